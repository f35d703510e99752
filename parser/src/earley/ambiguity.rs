use std::fmt::Write;

use anyhow::Result;

use crate::api::EOF_SYM;

use super::{
    chart::Chart,
    grammar::{Grammar, Symbol},
    parser::ParseError,
};

/// User hooks for `%disfilter n` and `%N` annotations.
///
/// `p1` and `p2` are item indices of the two competing alternatives and can
/// be inspected through the forest. A return value outside `{1, 2}` aborts
/// the parse.
pub trait Disambiguator {
    /// Rules labeled `%disfilter n1` and `%disfilter n2` derive the same
    /// phrase. Return 1 to keep `p1`, 2 to take `p2`.
    ///
    /// Closure repeats its passes while the list grows, so the same
    /// collision can be presented several times, with `p1` and `p2`
    /// (and `n1`, `n2`) swapped after an overwrite.
    fn disfilter(&mut self, n1: i32, n2: i32, p1: usize, p2: usize) -> i32;

    /// A member labeled `%n` has two parses; `p1` is the one with the
    /// longer prefix. Return 1 to select the short one, 2 the long one.
    fn confilter(&mut self, n: i32, p1: usize, p2: usize) -> i32;
}

/// Stand-in used when the client supplies no filters: the larger
/// `%disfilter` number wins, and `%N` behaves like `%short` for 1 and
/// `%long` for 2.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDisambiguator;

impl Disambiguator for DefaultDisambiguator {
    fn disfilter(&mut self, n1: i32, n2: i32, _p1: usize, _p2: usize) -> i32 {
        if n1 > n2 {
            1
        } else if n1 < n2 {
            2
        } else {
            3
        }
    }

    fn confilter(&mut self, n: i32, _p1: usize, _p2: usize) -> i32 {
        n
    }
}

const HEADER: &str = "\nGRAMMAR DEBUG INFORMATION\n\n";
const FOOTER: &str = "\nEND OF GRAMMAR DEBUG INFORMATION\n\n";

/// Context for resolving one collision between an item in the current list
/// and the tentative item in the sentinel slot.
pub struct Resolver<'a> {
    pub grammar: &'a Grammar,
    pub chart: &'a mut Chart,
    pub filters: &'a mut dyn Disambiguator,
    pub dynamic_cycle_check: bool,
    /// Where to report an unhandled ambiguity.
    pub pos: i64,
}

impl<'a> Resolver<'a> {
    fn unhandled(&self, diagnostic: String) -> anyhow::Error {
        ParseError::UnhandledAmbiguity {
            pos: self.pos,
            diagnostic,
        }
        .into()
    }

    /// Same dot and back, different `left`: two ways to split the members
    /// before the dot.
    pub fn conjunctive(&mut self, i: usize) -> Result<()> {
        let new = self.chart.item(self.chart.sentinel());
        let old = self.chart.item(i);
        let left1 = old.left;
        let (left2, sub2) = (new.left, new.sub);
        let annotation = self.grammar.member_annotation(old.dot - 1);

        let keep_old = match annotation {
            1 => left1 > left2,
            2 => left2 > left1,
            0 => return Err(self.unhandled(self.conjunctive_report(i, new.dot, left1, left2))),
            _ => {
                let n = -annotation;
                let sentinel = self.chart.sentinel();
                if left1 > left2 {
                    match self.filters.confilter(n, i, sentinel) {
                        1 => true,
                        2 => false,
                        r => return Err(contract("confilter", r)),
                    }
                } else {
                    match self.filters.confilter(n, sentinel, i) {
                        2 => true,
                        1 => false,
                        r => return Err(contract("confilter", r)),
                    }
                }
            }
        };

        if !keep_old {
            self.chart.set_links(i, left2, sub2);
        }
        Ok(())
    }

    /// Same dot, back and left, different `sub`: two derivations of the
    /// nonterminal before the dot.
    pub fn disjunctive(&mut self, i: usize) -> Result<()> {
        let new = self.chart.item(self.chart.sentinel());
        let sub1 = self.chart.sub(i);
        let s = new.sub;

        let prio1 = self.grammar.rule_prio(self.chart.dot(sub1));
        let prio2 = self.grammar.rule_prio(self.chart.dot(s));

        if prio1 == -1 || prio2 == -1 {
            return Err(self.unhandled(self.disjunctive_report(new.dot, sub1, s)));
        }

        let overwrite = if prio1 < 0 || prio2 < 0 {
            match self.filters.disfilter(-prio1 - 1, -prio2 - 1, sub1, s) {
                1 => false,
                2 => true,
                r => return Err(contract("disfilter", r)),
            }
        } else {
            prio1 < prio2
        };

        if overwrite {
            if self.dynamic_cycle_check && s >= i && self.chart.reaches(i, s) {
                let mut r = String::from(HEADER);
                writeln!(
                    r,
                    "Annotation for ``{}'' allows cyclic derivation.",
                    self.grammar.sym_name(self.grammar.entry(new.dot - 1))
                )
                .unwrap();
                r.push_str(FOOTER);
                return Err(self.unhandled(r));
            }
            self.chart.set_sub(i, s);
        }
        Ok(())
    }

    fn conjunctive_report(&self, i: usize, d: usize, left1: usize, left2: usize) -> String {
        let g = self.grammar;
        let member = g.sym_name(g.entry(d - 1));
        let end = g.end_of_rule(self.chart.dot(i));
        let mut r = String::from(HEADER);
        r.push_str("Grammar ambiguity detected.\n");
        r.push_str("There are two different parses\n");
        writeln!(
            r,
            "for the beginning of ``{}'', alternative at {},",
            g.nonterminal_name(g.lhs_of(end)),
            g.coordinate(end + 1)
        )
        .unwrap();
        writeln!(r, "upto and containing ``{}'' at {}.", member, g.coordinate(d - 1)).unwrap();
        r.push_str("\nPARSE 1\n-------\n\n");
        r.push_str(&tree_to_string(g, &*self.chart, i));
        r.push_str("\nPARSE 2\n-------\n\n");
        r.push_str(&tree_to_string(g, &*self.chart, self.chart.sentinel()));
        writeln!(r, "\nFor ``{}'' at {},", member, g.coordinate(d - 1)).unwrap();
        if left1 > left2 {
            r.push_str("use %short annotation to select first parse,\n");
            r.push_str("use %long annotation to select second parse.\n");
        } else {
            r.push_str("use %long annotation to select first parse,\n");
            r.push_str("use %short annotation to select second parse.\n");
        }
        r.push_str(FOOTER);
        r
    }

    fn disjunctive_report(&self, d: usize, sub1: usize, sub2: usize) -> String {
        let g = self.grammar;
        let mut r = String::from(HEADER);
        r.push_str("Grammar ambiguity detected.\n");
        writeln!(
            r,
            "Two different ``{}'' derivation trees for the same phrase.",
            g.sym_name(g.entry(d - 1))
        )
        .unwrap();
        r.push_str("\nTREE 1\n------\n\n");
        r.push_str(&tree_to_string(g, &*self.chart, sub1));
        r.push_str("\nTREE 2\n------\n\n");
        r.push_str(&tree_to_string(g, &*self.chart, sub2));
        r.push('\n');

        if self.chart.reaches(sub2, sub1) {
            r.push_str("Tree 1 contains tree 2 as subtree.\n");
            r.push_str("Use %prio annotation to select the second tree.\n");
            r.push_str("An annotation selecting the first tree\n");
            r.push_str("would not resolve the ambiguity.\n");
        } else if self.chart.reaches(sub1, sub2) {
            r.push_str("Tree 2 contains tree 1 as subtree.\n");
            r.push_str("Use %prio annotation to select the first tree.\n");
            r.push_str("An annotation selecting the second tree\n");
            r.push_str("would not resolve the ambiguity.\n");
        } else {
            r.push_str("Use %prio annotation to select an alternative.\n");
        }
        r.push_str(FOOTER);
        r
    }
}

fn contract(callback: &'static str, value: i32) -> anyhow::Error {
    ParseError::CallbackContract { callback, value }.into()
}

enum Task {
    Visit(usize),
    Token(usize),
    Close,
}

/// Render the forest below item `root`, one node per line, nested
/// alternatives in braces.
pub fn tree_to_string(grammar: &Grammar, chart: &Chart, root: usize) -> String {
    let mut out = String::new();
    let mut indent = 0;
    let mut todo = vec![Task::Visit(root)];

    while let Some(task) = todo.pop() {
        match task {
            Task::Visit(i) => {
                let it = chart.item(i);
                let at_end = matches!(grammar.next_symbol(it.dot), Symbol::RuleEnd(_));
                if at_end {
                    writeln!(
                        out,
                        "{}{} alternative at {} {{",
                        "  ".repeat(indent),
                        grammar.nonterminal_name(grammar.lhs_of(it.dot)),
                        grammar.coordinate(it.dot + 1)
                    )
                    .unwrap();
                    indent += 1;
                    todo.push(Task::Close);
                }
                if it.sub != 0 {
                    todo.push(Task::Visit(it.sub));
                }
                if it.left != 0 {
                    todo.push(Task::Token(i));
                    todo.push(Task::Visit(it.left));
                }
            }
            Task::Token(i) => {
                if let Symbol::Terminal(t) = grammar.next_symbol(chart.dot(i) - 1) {
                    if t == EOF_SYM {
                        continue;
                    }
                    writeln!(out, "{}{}", "  ".repeat(indent), grammar.sym_name(t)).unwrap();
                }
            }
            Task::Close => {
                indent -= 1;
                writeln!(out, "{}}}", "  ".repeat(indent)).unwrap();
            }
        }
    }
    out
}
