// An item list is what the literature calls an Earley set. Lists are laid
// out back to back in one item arena and separated by terminator items.
// Parse trees are never built during recognition: the `left` and `sub`
// links of the items form a shared forest, ambiguities are resolved as soon
// as two items with equal dot and back meet, and the single remaining tree
// is replayed afterwards as a left derivation.

use std::{fmt, fmt::Write, sync::Arc};

use anyhow::{anyhow, bail, ensure, Result};
use instant::Instant;
use serde::{Deserialize, Serialize};

use crate::{
    api::{ParserLimits, ParserOptions, EOF_SYM, TERM_BASE},
    infoln, warn, Logger,
};

use super::{
    ambiguity::{tree_to_string, DefaultDisambiguator, Disambiguator, Resolver},
    chart::{Chart, Insertion, Item},
    derivation::Derivation,
    grammar::{Grammar, Symbol, ACCEPT_DOT, START_DOT, START_RULE},
    lexer::{Lexer, LexvalStream},
};

const TRACE: bool = false;
const DEBUG: bool = true;

macro_rules! trace {
    ($($arg:tt)*) => {
        if cfg!(feature = "logging") && TRACE {
            eprintln!($($arg)*);
        }
    }
}

macro_rules! debug {
    ($($arg:tt)*) => {
        if cfg!(feature = "logging") && DEBUG {
            eprintln!($($arg)*);
        }
    }
}

/// Fatal outcomes of a parse. All of them end the parse; the process
/// exit status for each is 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    SyntaxError {
        pos: i64,
    },
    UnhandledAmbiguity {
        pos: i64,
        diagnostic: String,
    },
    CallbackContract {
        callback: &'static str,
        value: i32,
    },
    OutOfMemory,
    ProgramError,
}

impl ParseError {
    pub fn exit_code(&self) -> i32 {
        1
    }

    pub fn pos(&self) -> Option<i64> {
        match self {
            ParseError::SyntaxError { pos } | ParseError::UnhandledAmbiguity { pos, .. } => {
                Some(*pos)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::SyntaxError { pos } => write!(f, "{}: syntax error", pos),
            ParseError::UnhandledAmbiguity { pos, diagnostic } => write!(
                f,
                "{}{}: source text uncovers unhandled grammar ambiguity",
                diagnostic, pos
            ),
            ParseError::CallbackContract { callback, .. } => {
                write!(f, "user function `{}' returns invalid value", callback)
            }
            ParseError::OutOfMemory => write!(f, "running out of memory"),
            ParseError::ProgramError => write!(f, "PROGRAM ERROR"),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ParserStats {
    pub lists: usize,
    pub items: usize,
    pub hash_misses: usize,
    pub searches: usize,
    pub duplicates: usize,
    pub conjunctive: usize,
    pub disjunctive: usize,
    pub arena_growths: usize,
    pub compute_time_us: u64,
}

// State needed to recompute the list that followed it.
#[derive(Debug, Clone, Copy)]
struct Snapshot {
    sym: i32,
    yypos: i64,
    this_list: usize,
    last_item: usize,
}

pub struct Parser {
    grammar: Arc<Grammar>,
    chart: Chart,
    filters: Box<dyn Disambiguator>,
    options: ParserOptions,
    limits: ParserLimits,
    stats: ParserStats,
    pub logger: Logger,

    // token just shifted and the one after it, both with TERM_BASE added
    sym: i32,
    lookahead_sym: i32,
    // position of the most recently read token
    yypos: i64,
    lookahead_pos: i64,
    pos_for_error_msg: i64,

    lookahead_off: bool,
    itemlist_empty: bool,
    accepted: Option<usize>,
}

impl Parser {
    pub fn new(grammar: Arc<Grammar>, options: ParserOptions, limits: ParserLimits) -> Result<Self> {
        let chart = Chart::new(&limits)?;
        Ok(Parser {
            grammar,
            chart,
            filters: Box::new(DefaultDisambiguator),
            options,
            limits,
            stats: ParserStats::default(),
            logger: Logger::new(0, 1),
            sym: 0,
            lookahead_sym: EOF_SYM,
            yypos: 0,
            lookahead_pos: 0,
            pos_for_error_msg: 0,
            lookahead_off: false,
            itemlist_empty: false,
            accepted: None,
        })
    }

    /// Use `filters` for `%disfilter` and `%N` annotations.
    pub fn with_disambiguator(mut self, filters: Box<dyn Disambiguator>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Counters of the last parse.
    pub fn stats(&self) -> ParserStats {
        let c = self.chart.stats();
        ParserStats {
            items: c.items,
            hash_misses: c.hash_misses,
            searches: c.searches,
            duplicates: c.duplicates,
            arena_growths: c.growths,
            ..self.stats.clone()
        }
    }

    /// Index of the `YYSTART : UserRoot EOF *` item after a successful parse.
    pub fn accepting_item(&self) -> Option<usize> {
        self.accepted
    }

    /// Recognize the whole token stream of `lexer`. On success the forest is
    /// kept in the parser and can be replayed through `derivation`; the
    /// returned stream holds the semantic values of all tokens read.
    ///
    /// Failures are `ParseError`s wrapped in `anyhow::Error`; lexer errors
    /// are passed through unchanged.
    pub fn parse<L: Lexer>(&mut self, lexer: &mut L) -> Result<LexvalStream<L::Value>> {
        let t0 = Instant::now();
        self.chart = Chart::new(&self.limits)?;
        self.stats = ParserStats::default();
        self.accepted = None;
        self.lookahead_off = false;
        self.itemlist_empty = false;
        self.sym = 0;
        if !self.options.detect_ambiguity {
            warn!(self, "ambiguity detection is off; the first derivation found wins");
        }

        self.lookahead_sym = read_token(lexer)?;
        self.yypos = lexer.pos();
        self.lookahead_pos = self.yypos;
        self.pos_for_error_msg = self.yypos;

        let mut lexvals = LexvalStream::new();
        lexvals.first_lexval(lexer.value(), self.yypos);

        let r = self.run(lexer, &mut lexvals);
        self.stats.compute_time_us += t0.elapsed().as_micros() as u64;
        r?;

        infoln!(
            self,
            "parse done: {} lexvals, {} lists, {} items, {} us",
            lexvals.len(),
            self.stats.lists,
            self.chart.stats().items,
            self.stats.compute_time_us
        );
        Ok(lexvals)
    }

    /// Left derivation of the last successful parse.
    pub fn derivation(&self) -> Result<Derivation<'_>> {
        match self.accepted {
            Some(root) => Ok(Derivation::new(
                &self.grammar,
                &self.chart,
                root,
                self.limits.stack_increment,
            )),
            None => bail!("no successful parse to derive from"),
        }
    }

    fn run<L: Lexer>(&mut self, lexer: &mut L, lexvals: &mut LexvalStream<L::Value>) -> Result<()> {
        self.initial_itemlist()?;

        let initial_list = self.chart.this_list();
        let mut saved = self.snapshot();
        let mut saved_saved;

        loop {
            self.readsym(lexer, lexvals)?;
            saved_saved = saved;
            saved = self.snapshot();
            self.next_itemlist()?;
            if self.itemlist_empty {
                break;
            }
            if self.sym == EOF_SYM {
                let root = self.chart.this_list();
                if self.chart.dot(root) != ACCEPT_DOT {
                    return Err(ParseError::ProgramError.into());
                }
                self.accepted = Some(root);
                return Ok(());
            }
        }

        debug!(
            "empty item list after {} at {}",
            self.grammar.sym_name(self.sym),
            self.pos_for_error_msg
        );
        if !self.options.error_position_correction {
            return Err(ParseError::SyntaxError {
                pos: self.pos_for_error_msg,
            }
            .into());
        }
        self.correct_error_position(initial_list, saved, saved_saved)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            sym: self.sym,
            yypos: self.yypos,
            this_list: self.chart.this_list(),
            last_item: self.chart.last_item(),
        }
    }

    // The lookahead filters may reject a list one token before the input
    // really goes wrong. Recompute the last steps with the filters off and
    // report the first one that fails.
    fn correct_error_position(
        &mut self,
        initial_list: usize,
        saved: Snapshot,
        saved_saved: Snapshot,
    ) -> Result<()> {
        infoln!(self, "recomputing the last item lists without lookahead");
        self.lookahead_off = true;

        if saved.this_list == initial_list {
            self.chart.rewind(saved.this_list, saved.last_item);
        } else {
            self.chart
                .rewind(saved_saved.this_list, saved_saved.last_item);
            self.sym = saved_saved.sym;
            self.next_itemlist()?;
            if self.itemlist_empty {
                return Err(ParseError::SyntaxError {
                    pos: saved_saved.yypos,
                }
                .into());
            }
        }

        self.sym = saved.sym;
        self.next_itemlist()?;
        if self.itemlist_empty {
            return Err(ParseError::SyntaxError {
                pos: saved_saved.yypos,
            }
            .into());
        }

        self.sym = self.lookahead_sym;
        self.next_itemlist()?;
        if self.itemlist_empty {
            return Err(ParseError::SyntaxError { pos: saved.yypos }.into());
        }

        Err(ParseError::ProgramError.into())
    }

    fn readsym<L: Lexer>(&mut self, lexer: &mut L, lexvals: &mut LexvalStream<L::Value>) -> Result<()> {
        self.sym = self.lookahead_sym;
        self.pos_for_error_msg = self.lookahead_pos;
        if self.lookahead_sym != EOF_SYM {
            self.lookahead_sym = read_token(lexer)?;
            self.yypos = lexer.pos();
            self.lookahead_pos = self.yypos;
        }
        lexvals.next_lexval(lexer.value(), self.yypos);
        Ok(())
    }

    fn initial_itemlist(&mut self) -> Result<()> {
        self.chart.begin_initial();
        self.stats.lists += 1;
        self.add_item(Item::new(START_DOT, START_RULE, 0, 0))?;
        self.closure()?;
        self.chart.push_terminator()
    }

    fn next_itemlist(&mut self) -> Result<()> {
        self.itemlist_empty = false;
        let prev = self.chart.begin_list();
        self.stats.lists += 1;
        trace!(
            "list at {}: shift {}",
            self.chart.this_list(),
            self.grammar.sym_name(self.sym)
        );

        self.kernel(prev)?;
        if self.chart.last_item() < self.chart.this_list() {
            self.itemlist_empty = true;
        }
        self.closure()?;
        self.chart.push_terminator()
    }

    #[inline(always)]
    fn viable(&self, idx: usize) -> bool {
        !self.options.check_viable
            || self.lookahead_off
            || self.grammar.is_viable(idx, self.lookahead_sym)
    }

    fn kernel(&mut self, prev: usize) -> Result<()> {
        let mut i = prev;
        loop {
            let it = self.chart.item(i);
            if it.dot == 0 {
                break;
            }
            if self.grammar.entry(it.dot) == self.sym {
                if self.viable(it.dot + 1) {
                    self.add_item(Item::new(it.dot + 1, it.back, i, 0))?;
                } else {
                    trace!("rejected by viability (kernel): {}", self.item_to_string(i));
                }
            }
            i += 1;
        }
        Ok(())
    }

    fn closure(&mut self) -> Result<()> {
        loop {
            let old_end = self.chart.last_item();
            let mut i = self.chart.this_list();
            while i <= self.chart.last_item() {
                match self.grammar.next_symbol(self.chart.dot(i)) {
                    Symbol::RuleEnd(_) => self.completer(i)?,
                    Symbol::Nonterminal(nt) => self.predictor(nt)?,
                    Symbol::Terminal(_) | Symbol::Null => {}
                }
                i += 1;
            }
            if old_end == self.chart.last_item() {
                return Ok(());
            }
        }
    }

    fn predictor(&mut self, nonterminal: usize) -> Result<()> {
        let this_list = self.chart.this_list();
        let mut rule = nonterminal;
        while rule != 0 {
            if !self.options.lookahead
                || self.lookahead_off
                || self.grammar.dirset_contains(rule, self.lookahead_sym)
            {
                self.add_item(Item::new(rule + 1, this_list, 0, 0))?;
            }
            rule = self.grammar.chain(rule);
        }
        Ok(())
    }

    fn completer(&mut self, item: usize) -> Result<()> {
        let completed = self.chart.item(item);
        let lhs = -self.grammar.entry(completed.dot);
        let mut i = completed.back;

        self.chart.clear_sentinel();
        loop {
            let waiting = self.chart.item(i);
            if waiting.dot == 0 {
                break;
            }
            if self.grammar.entry(waiting.dot) == lhs {
                if self.viable(waiting.dot + 1) {
                    self.add_item(Item::new(waiting.dot + 1, waiting.back, i, item))?;
                    self.chart.clear_sentinel();
                } else {
                    trace!("rejected by viability (completer): {}", self.item_to_string(i));
                }
            }
            i += 1;
        }
        Ok(())
    }

    fn add_item(&mut self, item: Item) -> Result<()> {
        match self.chart.insert(item, self.options.hashing)? {
            Insertion::Added | Insertion::Duplicate => Ok(()),
            Insertion::Conjunctive(i) => {
                self.stats.conjunctive += 1;
                if self.options.detect_ambiguity {
                    self.resolver().conjunctive(i)?;
                }
                Ok(())
            }
            Insertion::Disjunctive(i) => {
                self.stats.disjunctive += 1;
                if self.options.detect_ambiguity {
                    self.resolver().disjunctive(i)?;
                }
                Ok(())
            }
        }
    }

    fn resolver(&mut self) -> Resolver<'_> {
        Resolver {
            grammar: &self.grammar,
            chart: &mut self.chart,
            filters: self.filters.as_mut(),
            dynamic_cycle_check: self.options.dynamic_cycle_check,
            pos: self.pos_for_error_msg,
        }
    }

    pub fn item_to_string(&self, idx: usize) -> String {
        let it = self.chart.item(idx);
        format!(
            "{} (back:{} sub:{} left:{})",
            self.grammar.rule_to_string(it.dot),
            it.back,
            it.sub,
            it.left
        )
    }

    /// All item lists, one item per line.
    pub fn chart_to_string(&self) -> String {
        let mut out = String::new();
        let last = self.chart.last_item();
        let mut i = 1;
        let mut list_no = 0;
        while i <= last {
            writeln!(out, "LIST {} (start {})", list_no, i).unwrap();
            while i <= last && self.chart.dot(i) != 0 {
                writeln!(out, "  {:4}: {}", i, self.item_to_string(i)).unwrap();
                i += 1;
            }
            i += 1;
            list_no += 1;
        }
        out
    }

    /// Indented rendering of the accepted tree.
    pub fn forest_to_string(&self) -> Option<String> {
        self.accepted
            .map(|root| tree_to_string(&self.grammar, &self.chart, root))
    }
}

fn read_token<L: Lexer>(lexer: &mut L) -> Result<i32> {
    let t = lexer.next_token()?;
    ensure!(t >= 0, "lexer returned negative token code {}", t);
    t.checked_add(TERM_BASE)
        .ok_or_else(|| anyhow!("lexer returned token code {} out of range", t))
}
