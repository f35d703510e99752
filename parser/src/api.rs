use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Offset added to every token code coming from the lexer.
/// Grammar entries below this value are nonterminal references.
pub const TERM_BASE: i32 = 50000;

/// Largest single-character token code.
pub const MAX_CHAR: i32 = 255;

/// Encoded end-of-file terminal.
pub const EOF_SYM: i32 = TERM_BASE;

/// Coordinate value used by the encoder when no source location is known.
pub const NO_COORDINATE: i32 = 9999;

/// The tables emitted by the grammar encoder.
///
/// `grammar`, `annotation` and `coordinate` are parallel arrays; index 0 is
/// unused and the start rule `YYSTART : UserRoot EOF` occupies indices 1..=5.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct GrammarTables {
    pub grammar: Vec<i32>,
    pub annotation: Vec<i32>,
    pub coordinate: Vec<i32>,

    /// For each rule number, the token codes (without `TERM_BASE`)
    /// that may start a derivation of that rule.
    pub director_sets: Vec<DirectorSetEntry>,

    /// Print names of nonterminals, keyed by the index of their first rule.
    #[serde(default)]
    pub names: FxHashMap<i32, String>,

    /// Print names of named tokens, keyed by the encoded token value.
    #[serde(default)]
    pub token_names: FxHashMap<i32, String>,

    /// Nonterminals (by first-rule index) whose tree nodes are folded into
    /// their parent. Anything not listed here is not transparent.
    #[serde(default)]
    pub transparent: Vec<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectorSetEntry {
    pub rule: i32,
    pub tokens: Vec<i32>,
}

/// Switches for the individual optimizations and checks of the recognizer.
/// All of them are on by default.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ParserOptions {
    /// Restrict predictions to rules whose director set contains the lookahead.
    pub lookahead: bool,
    /// Reject kernel and completer items whose continuation cannot start
    /// with the lookahead.
    pub check_viable: bool,
    /// Recompute the last item lists without lookahead to find the real
    /// position of a syntax error.
    pub error_position_correction: bool,
    /// Resolve or report collisions between items with equal dot and back.
    /// When off, the first derivation found wins silently.
    pub detect_ambiguity: bool,
    /// Refuse annotations that would make the forest refer to itself.
    pub dynamic_cycle_check: bool,
    /// Use the per-list presence filter before searching the current list.
    pub hashing: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        ParserOptions {
            lookahead: true,
            check_viable: true,
            error_position_correction: true,
            detect_ambiguity: true,
            dynamic_cycle_check: true,
            hashing: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ParserLimits {
    /// Number of items the arena grows by when it is full.
    pub item_increment: usize,
    /// Number of entries the derivation stack grows by.
    pub stack_increment: usize,
    /// Hard cap on the number of items; exceeding it is reported
    /// as running out of memory.
    pub max_items: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            item_increment: 285_000,
            stack_increment: 200,
            max_items: usize::MAX,
        }
    }
}
