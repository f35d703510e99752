use anyhow::{bail, ensure, Result};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::api::{DirectorSetEntry, GrammarTables, EOF_SYM, MAX_CHAR, NO_COORDINATE, TERM_BASE};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct NontermRef {
    idx: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct RuleRef {
    idx: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Member {
    Sym(NontermRef),
    Char(char),
    /// Named token; the code is given without `TERM_BASE`.
    Token(i32),
}

/// How to choose between two parses of the members up to and including an
/// annotated nonterminal member.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Annotation {
    #[default]
    Undef,
    Short,
    Long,
    /// Ask `Disambiguator::confilter` with this number.
    Confilter(u32),
}

impl Annotation {
    fn encode(&self) -> i32 {
        match self {
            Annotation::Undef => 0,
            Annotation::Short => 1,
            Annotation::Long => 2,
            Annotation::Confilter(n) => -(*n as i32),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Priority {
    #[default]
    Unset,
    Prio(u32),
    /// Ask `Disambiguator::disfilter` with this number.
    Disfilter(u32),
}

impl Priority {
    fn encode(&self) -> i32 {
        match self {
            Priority::Unset => -1,
            Priority::Prio(n) => *n as i32,
            Priority::Disfilter(n) => -(*n as i32) - 1,
        }
    }
}

fn pack(line: u32, col: u32) -> i32 {
    (line * 1000 + col) as i32
}

struct Nonterminal {
    name: String,
    rules: Vec<usize>,
    transparent: bool,
    coordinate: i32,
}

struct Rule {
    lhs: usize,
    members: Vec<Member>,
    annotations: Vec<Annotation>,
    member_coordinates: Vec<i32>,
    prio: Priority,
    coordinate: i32,
}

/// Builds encoder tables for grammars written in code.
///
/// Rules are laid out grouped by lhs in the order the nonterminals were
/// declared, and numbered 1.. in that order; the start rule
/// `YYSTART : root EOF` gets the next number.
#[derive(Default)]
pub struct GrammarBuilder {
    nonterminals: Vec<Nonterminal>,
    by_name: FxHashMap<String, NontermRef>,
    rules: Vec<Rule>,
    token_names: FxHashMap<i32, String>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nonterminal(&mut self, name: &str) -> NontermRef {
        if let Some(r) = self.by_name.get(name) {
            return *r;
        }
        let r = NontermRef {
            idx: self.nonterminals.len(),
        };
        self.nonterminals.push(Nonterminal {
            name: name.to_string(),
            rules: vec![],
            transparent: false,
            coordinate: NO_COORDINATE,
        });
        self.by_name.insert(name.to_string(), r);
        r
    }

    /// Register a print name for a named token.
    pub fn token(&mut self, code: i32, name: &str) -> Member {
        assert!(code > MAX_CHAR, "token code {} is a character code", code);
        self.token_names.insert(TERM_BASE + code, name.to_string());
        Member::Token(code)
    }

    pub fn rule(&mut self, lhs: NontermRef, members: &[Member]) -> RuleRef {
        let r = RuleRef {
            idx: self.rules.len(),
        };
        self.rules.push(Rule {
            lhs: lhs.idx,
            members: members.to_vec(),
            annotations: vec![Annotation::Undef; members.len()],
            member_coordinates: vec![NO_COORDINATE; members.len()],
            prio: Priority::Unset,
            coordinate: NO_COORDINATE,
        });
        self.nonterminals[lhs.idx].rules.push(r.idx);
        r
    }

    /// Annotate member `member` (0-based) of `rule`.
    pub fn annotate(&mut self, rule: RuleRef, member: usize, annotation: Annotation) {
        self.rules[rule.idx].annotations[member] = annotation;
    }

    pub fn prio(&mut self, rule: RuleRef, prio: Priority) {
        self.rules[rule.idx].prio = prio;
    }

    /// Grammar source position of the rule.
    pub fn at(&mut self, rule: RuleRef, line: u32, col: u32) {
        self.rules[rule.idx].coordinate = pack(line, col);
    }

    pub fn member_at(&mut self, rule: RuleRef, member: usize, line: u32, col: u32) {
        self.rules[rule.idx].member_coordinates[member] = pack(line, col);
    }

    /// Source position of the nonterminal's declaration; for the root it is
    /// also used for the start rule.
    pub fn declared_at(&mut self, nt: NontermRef, line: u32, col: u32) {
        self.nonterminals[nt.idx].coordinate = pack(line, col);
    }

    pub fn transparent(&mut self, nt: NontermRef) {
        self.nonterminals[nt.idx].transparent = true;
    }

    fn layout_order(&self) -> Vec<usize> {
        self.nonterminals
            .iter()
            .flat_map(|nt| nt.rules.iter().copied())
            .collect()
    }

    /// The number `finalize` assigns to `rule`.
    pub fn rule_number(&self, rule: RuleRef) -> i32 {
        self.layout_order()
            .iter()
            .position(|&r| r == rule.idx)
            .map(|p| p as i32 + 1)
            .unwrap_or(-1)
    }

    pub fn start_rule_number(&self) -> i32 {
        self.rules.len() as i32 + 1
    }

    fn encode_member(&self, m: &Member, first_rule: &[usize]) -> Result<i32> {
        match m {
            Member::Sym(nt) => {
                let pos = first_rule[nt.idx];
                ensure!(
                    pos != 0,
                    "nonterminal {} is used but has no rules",
                    self.nonterminals[nt.idx].name
                );
                Ok(pos as i32)
            }
            Member::Char(c) => {
                let code = *c as u32;
                ensure!(
                    code > 0 && code <= MAX_CHAR as u32,
                    "character {:?} cannot be a token",
                    c
                );
                Ok(TERM_BASE + code as i32)
            }
            Member::Token(code) => {
                ensure!(*code > MAX_CHAR, "token code {} is a character code", code);
                Ok(TERM_BASE + code)
            }
        }
    }

    pub fn finalize(&self, root: NontermRef) -> Result<GrammarTables> {
        ensure!(
            !self.nonterminals[root.idx].rules.is_empty(),
            "root {} has no rules",
            self.nonterminals[root.idx].name
        );

        // chain-link index of the first rule of each nonterminal
        let mut first_rule = vec![0usize; self.nonterminals.len()];
        let mut rule_pos = vec![0usize; self.rules.len()];
        let mut pos = 6;
        for (i, nt) in self.nonterminals.iter().enumerate() {
            for (k, &r) in nt.rules.iter().enumerate() {
                if k == 0 {
                    first_rule[i] = pos;
                }
                rule_pos[r] = pos;
                pos += self.rules[r].members.len() + 3;
            }
        }
        let len = pos + 1;

        let mut grammar = vec![0; len];
        let mut annotation = vec![0; len];
        let mut coordinate = vec![NO_COORDINATE; len];

        let start_no = self.start_rule_number();
        let root_pos = first_rule[root.idx] as i32;
        grammar[1..6].copy_from_slice(&[0, root_pos, EOF_SYM, -1, start_no]);
        annotation[1..6].copy_from_slice(&[0, 0, EOF_SYM, -1, 0]);
        coordinate[2] = self.nonterminals[root.idx].coordinate;
        coordinate[5] = self.nonterminals[root.idx].coordinate;

        let mut number = 0;
        for nt in self.nonterminals.iter() {
            for (k, &r) in nt.rules.iter().enumerate() {
                number += 1;
                let rule = &self.rules[r];
                let at = rule_pos[r];
                let chain = match nt.rules.get(k + 1) {
                    Some(&next) => rule_pos[next] as i32,
                    None => 0,
                };
                grammar[at] = chain;
                annotation[at] = chain;
                for (j, m) in rule.members.iter().enumerate() {
                    let idx = at + 1 + j;
                    grammar[idx] = self.encode_member(m, &first_rule)?;
                    annotation[idx] = match m {
                        Member::Sym(_) => rule.annotations[j].encode(),
                        _ => {
                            ensure!(
                                rule.annotations[j] == Annotation::Undef,
                                "terminal member {} of rule {} cannot be annotated",
                                j,
                                number
                            );
                            grammar[idx]
                        }
                    };
                    coordinate[idx] = rule.member_coordinates[j];
                }
                let end = at + 1 + rule.members.len();
                grammar[end] = -(first_rule[rule.lhs] as i32);
                annotation[end] = grammar[end];
                grammar[end + 1] = number;
                annotation[end + 1] = rule.prio.encode();
                coordinate[end + 1] = rule.coordinate;
            }
        }

        let mut names = FxHashMap::default();
        names.insert(1, "YYSTART".to_string());
        for (i, nt) in self.nonterminals.iter().enumerate() {
            if first_rule[i] != 0 {
                names.insert(first_rule[i] as i32, nt.name.clone());
            }
        }

        let transparent = self
            .nonterminals
            .iter()
            .enumerate()
            .filter(|(i, nt)| nt.transparent && first_rule[*i] != 0)
            .map(|(i, _)| first_rule[i] as i32)
            .collect();

        Ok(GrammarTables {
            grammar,
            annotation,
            coordinate,
            director_sets: self.director_sets(root)?,
            names,
            token_names: self.token_names.clone(),
            transparent,
        })
    }

    fn token_code(m: &Member) -> Option<i32> {
        match m {
            Member::Sym(_) => None,
            Member::Char(c) => Some(*c as i32),
            Member::Token(t) => Some(*t),
        }
    }

    // FIRST of `members`, and whether all of them can derive the empty string.
    fn first_of(
        members: &[Member],
        first: &[FxHashSet<i32>],
        nullable: &[bool],
    ) -> (FxHashSet<i32>, bool) {
        let mut r = FxHashSet::default();
        for m in members {
            match m {
                Member::Sym(nt) => {
                    r.extend(first[nt.idx].iter().copied());
                    if !nullable[nt.idx] {
                        return (r, false);
                    }
                }
                _ => {
                    if let Some(t) = Self::token_code(m) {
                        r.insert(t);
                    }
                    return (r, false);
                }
            }
        }
        (r, true)
    }

    /// Director set of each rule: FIRST of its rhs, plus FOLLOW of its lhs
    /// when the rhs can be empty.
    fn director_sets(&self, root: NontermRef) -> Result<Vec<DirectorSetEntry>> {
        let n = self.nonterminals.len();
        let mut nullable = vec![false; n];
        let mut first: Vec<FxHashSet<i32>> = vec![FxHashSet::default(); n];
        let mut follow: Vec<FxHashSet<i32>> = vec![FxHashSet::default(); n];
        follow[root.idx].insert(0);

        let mut changed = true;
        while changed {
            changed = false;
            for rule in &self.rules {
                let (f, null) = Self::first_of(&rule.members, &first, &nullable);
                if null && !nullable[rule.lhs] {
                    nullable[rule.lhs] = true;
                    changed = true;
                }
                let before = first[rule.lhs].len();
                first[rule.lhs].extend(f);
                changed |= first[rule.lhs].len() != before;
            }
        }

        changed = true;
        while changed {
            changed = false;
            for rule in &self.rules {
                for (j, m) in rule.members.iter().enumerate() {
                    if let Member::Sym(nt) = m {
                        let (mut f, rest_nullable) =
                            Self::first_of(&rule.members[j + 1..], &first, &nullable);
                        if rest_nullable {
                            f.extend(follow[rule.lhs].iter().copied());
                        }
                        let before = follow[nt.idx].len();
                        follow[nt.idx].extend(f);
                        changed |= follow[nt.idx].len() != before;
                    }
                }
            }
        }

        let mut entries = vec![];
        let mut number = 0;
        for nt in &self.nonterminals {
            for &r in &nt.rules {
                number += 1;
                let rule = &self.rules[r];
                let (mut f, null) = Self::first_of(&rule.members, &first, &nullable);
                if null {
                    f.extend(follow[rule.lhs].iter().copied());
                }
                let mut tokens: Vec<i32> = f.into_iter().collect();
                tokens.sort_unstable();
                entries.push(DirectorSetEntry {
                    rule: number,
                    tokens,
                });
            }
        }

        let mut start: Vec<i32> = first[root.idx].iter().copied().collect();
        if nullable[root.idx] {
            start.push(0);
        }
        start.sort_unstable();
        if start.is_empty() {
            bail!(
                "root {} derives no terminal string",
                self.nonterminals[root.idx].name
            );
        }
        entries.push(DirectorSetEntry {
            rule: self.start_rule_number(),
            tokens: start,
        });
        Ok(entries)
    }
}
