use std::{fmt, ops::Range};

use anyhow::{bail, ensure, Result};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::api::{GrammarTables, EOF_SYM, MAX_CHAR, NO_COORDINATE, TERM_BASE};

use super::dirset::{DirectorSetOracle, DirectorSets};

/// Grammar index of the dot in `YYSTART : * UserRoot EOF`.
pub const START_DOT: usize = 2;

/// Grammar index of the dot in `YYSTART : UserRoot EOF *`.
pub const ACCEPT_DOT: usize = 4;

/// Grammar index of the first (and only) rule of `YYSTART`.
pub const START_RULE: usize = 1;

/// What a grammar index points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// Index 0, or a terminator item's dot.
    Null,
    /// A nonterminal member, given by the index of its first rule.
    Nonterminal(usize),
    /// A terminal member, including `TERM_BASE`.
    Terminal(i32),
    /// The end of a rule; carries the first-rule index of the lhs.
    RuleEnd(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coordinate {
    pub line: i32,
    pub col: i32,
}

impl Coordinate {
    pub fn from_packed(packed: i32) -> Self {
        Coordinate {
            line: packed / 1000,
            col: packed % 1000,
        }
    }

    pub fn is_known(&self) -> bool {
        self.line * 1000 + self.col != NO_COORDINATE
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, col {} of grammar", self.line, self.col)
    }
}

/// Read-only view of the encoded grammar, its annotations and coordinates.
///
/// A rule `[r] M0 : M1 ... Mn` is laid out as
/// `chain, M1, ..., Mn, -M0, r` where `chain` is the index of the next rule
/// for `M0` (or 0), nonterminals are referenced by the index of their first
/// rule and terminals are `TERM_BASE + code`.
pub struct Grammar {
    grammar: Vec<i32>,
    annotation: Vec<i32>,
    coordinate: Vec<i32>,
    dirsets: Box<dyn DirectorSetOracle>,
    names: FxHashMap<i32, String>,
    token_names: FxHashMap<i32, String>,
    transparent: FxHashSet<usize>,
    rule_positions: FxHashMap<i32, usize>,
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("len", &self.grammar.len())
            .field("rules", &self.rule_positions.len())
            .field("nonterminals", &self.names.len())
            .finish()
    }
}

impl Grammar {
    pub fn new(tables: GrammarTables) -> Result<Self> {
        let dirsets = DirectorSets::from_entries(&tables.director_sets)?;
        Self::with_oracle(tables, Box::new(dirsets))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let tables: GrammarTables = serde_json::from_str(json)?;
        Self::new(tables)
    }

    /// Use `oracle` instead of the director sets listed in `tables`.
    pub fn with_oracle(tables: GrammarTables, oracle: Box<dyn DirectorSetOracle>) -> Result<Self> {
        let g = &tables.grammar;
        let len = g.len();
        ensure!(
            tables.annotation.len() == len && tables.coordinate.len() == len,
            "grammar, annotation and coordinate tables differ in length ({}, {}, {})",
            len,
            tables.annotation.len(),
            tables.coordinate.len()
        );
        ensure!(len > 6, "grammar table too short ({} entries)", len);
        ensure!(
            g[START_RULE] == 0 && g[3] == EOF_SYM && g[ACCEPT_DOT] == -(START_RULE as i32),
            "grammar does not start with `YYSTART : UserRoot EOF`"
        );
        ensure!(
            g[START_DOT] > 0 && g[START_DOT] < TERM_BASE,
            "user root at index {} is not a nonterminal",
            START_DOT
        );

        let mut rule_positions = FxHashMap::default();
        // rule start -> lhs marker
        let mut rule_starts = FxHashMap::default();
        let mut references = vec![];
        let mut chains = vec![];

        let mut pos = START_RULE;
        while pos + 2 < len {
            let chain = g[pos];
            ensure!(chain >= 0, "negative chain link at {}", pos);
            ensure!(
                chain == 0 || chain as usize > pos,
                "chain link at {} does not point forward",
                pos
            );
            let mut k = pos + 1;
            while k < len && g[k] >= 0 {
                let v = g[k];
                if v == 0 {
                    bail!("empty member at index {} (rule at {})", k, pos);
                }
                if v < TERM_BASE {
                    references.push((k, v));
                }
                k += 1;
            }
            ensure!(k + 1 < len, "rule at {} has no rule number", pos);
            references.push((k, -g[k]));
            let number = g[k + 1];
            ensure!(number >= 0, "negative rule number at {}", k + 1);
            if rule_positions.insert(number, pos).is_some() {
                bail!("rule number {} used twice", number);
            }
            if chain > 0 {
                chains.push((pos, chain as usize, g[k]));
            }
            rule_starts.insert(pos, g[k]);
            pos = k + 2;
        }

        for (at, target) in references {
            ensure!(
                target > 0 && rule_starts.contains_key(&(target as usize)),
                "entry at {} refers to {}, which is not the start of a rule",
                at,
                target
            );
        }
        for (at, target, lhs) in chains {
            ensure!(
                rule_starts.get(&target) == Some(&lhs),
                "chain link at {} leads to {}, which is not a rule of the same nonterminal",
                at,
                target
            );
        }

        let transparent = tables
            .transparent
            .iter()
            .filter(|&&t| t > 0)
            .map(|&t| t as usize)
            .collect();

        Ok(Grammar {
            grammar: tables.grammar,
            annotation: tables.annotation,
            coordinate: tables.coordinate,
            dirsets: oracle,
            names: tables.names,
            token_names: tables.token_names,
            transparent,
            rule_positions,
        })
    }

    pub fn len(&self) -> usize {
        self.grammar.len()
    }

    pub fn num_rules(&self) -> usize {
        self.rule_positions.len()
    }

    /// The raw encoded entry at `idx`.
    #[inline(always)]
    pub fn entry(&self, idx: usize) -> i32 {
        self.grammar[idx]
    }

    #[inline(always)]
    pub fn next_symbol(&self, idx: usize) -> Symbol {
        let v = self.grammar[idx];
        if v < 0 {
            Symbol::RuleEnd((-v) as usize)
        } else if v == 0 {
            Symbol::Null
        } else if v >= TERM_BASE {
            Symbol::Terminal(v)
        } else {
            Symbol::Nonterminal(v as usize)
        }
    }

    /// First rule of the user's root nonterminal.
    pub fn user_root(&self) -> usize {
        self.grammar[START_DOT] as usize
    }

    /// Rules (by the index of their chain link) for the nonterminal
    /// whose first rule is at `first_rule`.
    pub fn rules_of(&self, first_rule: usize) -> RuleChain<'_> {
        RuleChain {
            grammar: &self.grammar,
            next: first_rule,
        }
    }

    /// The next rule for the same lhs, or 0.
    #[inline(always)]
    pub fn chain(&self, rule: usize) -> usize {
        self.grammar[rule] as usize
    }

    /// Index of the lhs marker of the rule containing `idx`.
    #[inline(always)]
    pub fn end_of_rule(&self, idx: usize) -> usize {
        let mut i = idx;
        while self.grammar[i] >= 0 {
            i += 1;
        }
        i
    }

    /// Index holding the rule number (and the rule priority annotation).
    #[inline(always)]
    pub fn rule_number_index(&self, idx: usize) -> usize {
        self.end_of_rule(idx) + 1
    }

    pub fn rule_of(&self, idx: usize) -> i32 {
        self.grammar[self.rule_number_index(idx)]
    }

    pub fn lhs_of(&self, idx: usize) -> usize {
        (-self.grammar[self.end_of_rule(idx)]) as usize
    }

    /// Index of the chain link of the rule containing `idx`.
    pub fn rule_start(&self, idx: usize) -> usize {
        let mut b = idx - 1;
        while b > 0 && self.grammar[b] >= 0 {
            b -= 1;
        }
        if b == 0 {
            START_RULE
        } else {
            b + 2
        }
    }

    pub fn members(&self, rule: usize) -> Range<usize> {
        rule + 1..self.end_of_rule(rule + 1)
    }

    /// Chain-link index of the rule with number `rule_number`.
    pub fn rule_position(&self, rule_number: i32) -> Option<usize> {
        self.rule_positions.get(&rule_number).copied()
    }

    /// Annotation of the member at `idx`: 0 undef, 1 `%short`, 2 `%long`,
    /// negative for a user filter.
    #[inline(always)]
    pub fn member_annotation(&self, idx: usize) -> i32 {
        self.annotation[idx]
    }

    /// Priority of the rule containing `idx`: -1 unset, non-negative
    /// `%prio`, below -1 a `%disfilter` id.
    pub fn rule_prio(&self, idx: usize) -> i32 {
        self.annotation[self.rule_number_index(idx)]
    }

    pub fn coordinate(&self, idx: usize) -> Coordinate {
        Coordinate::from_packed(self.coordinate[idx])
    }

    /// Is `token` (encoded, including `TERM_BASE`) in the director set of
    /// the rule starting at `rule`?
    #[inline(always)]
    pub fn dirset_contains(&self, rule: usize, token: i32) -> bool {
        self.dirsets
            .contains(self.rule_of(rule + 1), token - TERM_BASE)
    }

    /// Can the symbol at `idx` start a derivation consistent with
    /// `lookahead`? Rule ends are always viable.
    pub fn is_viable(&self, idx: usize, lookahead: i32) -> bool {
        match self.next_symbol(idx) {
            Symbol::Terminal(t) => t == lookahead,
            Symbol::Nonterminal(nt) => self
                .rules_of(nt)
                .any(|rule| self.dirset_contains(rule, lookahead)),
            Symbol::RuleEnd(_) | Symbol::Null => true,
        }
    }

    pub fn nonterminal_name(&self, first_rule: usize) -> String {
        match self.names.get(&(first_rule as i32)) {
            Some(n) => n.clone(),
            None => format!("N{}", first_rule),
        }
    }

    /// Print name of an encoded grammar value.
    pub fn sym_name(&self, value: i32) -> String {
        if value == EOF_SYM {
            "<EOF>".to_string()
        } else if value > TERM_BASE && value <= TERM_BASE + MAX_CHAR {
            format!("'{}'", char::from((value - TERM_BASE) as u8))
        } else if value > TERM_BASE {
            match self.token_names.get(&value) {
                Some(n) => n.clone(),
                None => "special_character".to_string(),
            }
        } else if value > 0 {
            self.nonterminal_name(value as usize)
        } else {
            self.nonterminal_name((-value) as usize)
        }
    }

    pub fn is_transparent(&self, first_rule: usize) -> bool {
        self.transparent.contains(&first_rule)
    }

    /// Render the rule containing `dot` with the dot marked by `*`.
    pub fn rule_to_string(&self, dot: usize) -> String {
        if dot == 0 {
            return "[ separator-item ]".to_string();
        }
        let start = self.rule_start(dot);
        let end = self.end_of_rule(dot);
        let mut r = format!("{} :", self.nonterminal_name(self.lhs_of(dot)));
        for k in start + 1..end {
            if k == dot {
                r.push_str(" *");
            }
            r.push(' ');
            r.push_str(&self.sym_name(self.grammar[k]));
        }
        if dot == end {
            r.push_str(" *");
        }
        r
    }
}

pub struct RuleChain<'a> {
    grammar: &'a [i32],
    next: usize,
}

impl<'a> Iterator for RuleChain<'a> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.next == 0 {
            return None;
        }
        let rule = self.next;
        self.next = self.grammar[rule] as usize;
        Some(rule)
    }
}
