use std::fmt::{Debug, Write};

use anyhow::{anyhow, bail, ensure, Result};

use crate::earley::{Derivation, Grammar, Lexer, Lexval, LexvalStream, Parser, Symbol, START_RULE};

#[derive(Debug, Clone, PartialEq)]
pub enum Node<V> {
    Rule(Tree<V>),
    Token { sym: i32, lexval: Lexval<V> },
}

/// One selected rule with its members. Members that are transparent
/// nonterminals are replaced by their own members.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree<V> {
    pub rule: i32,
    /// Index of the first rule of the lhs nonterminal.
    pub lhs: usize,
    pub children: Vec<Node<V>>,
}

impl<V> Tree<V> {
    /// Rule numbers in pre-order.
    pub fn rules(&self) -> Vec<i32> {
        let mut r = vec![];
        let mut todo = vec![self];
        while let Some(t) = todo.pop() {
            r.push(t.rule);
            for c in t.children.iter().rev() {
                if let Node::Rule(sub) = c {
                    todo.push(sub);
                }
            }
        }
        r
    }

    /// Leaves, left to right.
    pub fn tokens(&self) -> Vec<&Lexval<V>> {
        let mut r = vec![];
        let mut todo = vec![self.children.iter()];
        while let Some(it) = todo.last_mut() {
            match it.next() {
                Some(Node::Token { lexval, .. }) => r.push(lexval),
                Some(Node::Rule(sub)) => todo.push(sub.children.iter()),
                None => {
                    todo.pop();
                }
            }
        }
        r
    }
}

impl<V: Debug> Tree<V> {
    pub fn render(&self, grammar: &Grammar) -> String {
        let mut out = String::new();
        let mut todo = vec![(0, self.children.iter())];
        writeln!(out, "{} (rule {})", grammar.nonterminal_name(self.lhs), self.rule).unwrap();
        while let Some((depth, it)) = todo.last_mut() {
            let indent = "  ".repeat(*depth + 1);
            let depth = *depth;
            match it.next() {
                Some(Node::Token { sym, lexval }) => {
                    writeln!(
                        out,
                        "{}{} {:?} @{}",
                        indent,
                        grammar.sym_name(*sym),
                        lexval.value,
                        lexval.pos
                    )
                    .unwrap();
                }
                Some(Node::Rule(sub)) => {
                    writeln!(
                        out,
                        "{}{} (rule {})",
                        indent,
                        grammar.nonterminal_name(sub.lhs),
                        sub.rule
                    )
                    .unwrap();
                    todo.push((depth + 1, sub.children.iter()));
                }
                None => {
                    todo.pop();
                }
            }
        }
        out
    }
}

struct Frame<V> {
    tree: Tree<V>,
    next: usize,
    end: usize,
}

fn open_frame<V>(grammar: &Grammar, derivation: &mut Derivation, lhs: usize) -> Result<Frame<V>> {
    let rule = derivation
        .next_rule()?
        .ok_or_else(|| anyhow!("derivation exhausted while expanding {}", grammar.nonterminal_name(lhs)))?;
    let pos = grammar
        .rule_position(rule)
        .ok_or_else(|| anyhow!("derivation selects unknown rule {}", rule))?;
    ensure!(
        grammar.lhs_of(pos + 1) == lhs,
        "derivation selects rule {} for {}",
        rule,
        grammar.nonterminal_name(lhs)
    );
    let members = grammar.members(pos);
    Ok(Frame {
        tree: Tree {
            rule,
            lhs,
            children: vec![],
        },
        next: members.start,
        end: members.end,
    })
}

/// Rebuild the tree the way a generated walker does: take one rule number
/// per nonterminal node, descend into the members left to right and take
/// one semantic value per terminal.
pub fn walk<V: Clone>(
    grammar: &Grammar,
    derivation: &mut Derivation,
    lexvals: &mut LexvalStream<V>,
) -> Result<Tree<V>> {
    let mut stack = vec![open_frame(grammar, derivation, START_RULE)?];

    while let Some(top) = stack.last_mut() {
        if top.next < top.end {
            let k = top.next;
            top.next += 1;
            match grammar.next_symbol(k) {
                Symbol::Terminal(sym) => {
                    let lexval = lexvals
                        .get_lexval()
                        .ok_or_else(|| anyhow!("no semantic value left for {}", grammar.sym_name(sym)))?
                        .clone();
                    top.tree.children.push(Node::Token { sym, lexval });
                }
                Symbol::Nonterminal(nt) => {
                    let frame = open_frame(grammar, derivation, nt)?;
                    stack.push(frame);
                }
                Symbol::RuleEnd(_) | Symbol::Null => bail!("no member at grammar index {}", k),
            }
            continue;
        }

        let done = match stack.pop() {
            Some(frame) => frame.tree,
            None => break,
        };
        match stack.last_mut() {
            Some(parent) => {
                if grammar.is_transparent(done.lhs) {
                    parent.tree.children.extend(done.children);
                } else {
                    parent.tree.children.push(Node::Rule(done));
                }
            }
            None => return Ok(done),
        }
    }
    bail!("walker stack underflow")
}

/// Parse the whole input of `lexer` and build its tree.
pub fn parse_tree<L: Lexer>(parser: &mut Parser, lexer: &mut L) -> Result<Tree<L::Value>> {
    let mut lexvals = parser.parse(lexer)?;
    let mut derivation = parser.derivation()?;
    walk(parser.grammar(), &mut derivation, &mut lexvals)
}
