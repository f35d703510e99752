use anyhow::Result;

use super::{chart::Chart, grammar::Grammar, parser::ParseError};

/// Replays the forest below the accepting item as a left derivation:
/// rule numbers come out in the order a recursive descent over the tree
/// would select them.
pub struct Derivation<'a> {
    grammar: &'a Grammar,
    chart: &'a Chart,
    root: usize,
    stack: Vec<usize>,
    increment: usize,
}

impl<'a> Derivation<'a> {
    pub(crate) fn new(grammar: &'a Grammar, chart: &'a Chart, root: usize, increment: usize) -> Self {
        let mut r = Derivation {
            grammar,
            chart,
            root,
            stack: Vec::new(),
            increment: increment.max(1),
        };
        r.stack.push(root);
        r
    }

    /// Start over from the accepting item.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.stack.push(self.root);
    }

    fn push(&mut self, idx: usize) -> Result<()> {
        if self.stack.len() == self.stack.capacity() {
            self.stack
                .try_reserve_exact(self.increment)
                .map_err(|_| ParseError::OutOfMemory)?;
        }
        self.stack.push(idx);
        Ok(())
    }

    /// The next rule number, or `None` when the forest is exhausted.
    pub fn next_rule(&mut self) -> Result<Option<i32>> {
        while let Some(i) = self.stack.pop() {
            let it = self.chart.item(i);
            if it.sub != 0 {
                self.push(it.sub)?;
            }
            if it.left != 0 {
                self.push(it.left)?;
            }
            if self.grammar.entry(it.dot) < 0 {
                return Ok(Some(self.grammar.entry(it.dot + 1)));
            }
        }
        Ok(None)
    }
}

impl<'a> Iterator for Derivation<'a> {
    type Item = Result<i32>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_rule().transpose()
    }
}
