mod ambiguity;
mod chart;
mod derivation;
mod dirset;
mod grammar;
mod lexer;
mod parser;

#[cfg(test)]
pub(crate) mod fixtures;

pub use ambiguity::{tree_to_string, DefaultDisambiguator, Disambiguator};
pub use chart::{Chart, ChartStats, Item};
pub use derivation::Derivation;
pub use dirset::{DirectorSetOracle, DirectorSets};
pub use grammar::{Coordinate, Grammar, RuleChain, Symbol, ACCEPT_DOT, START_DOT, START_RULE};
pub use lexer::{CharLexer, Lexer, Lexval, LexvalStream};
pub use parser::{ParseError, Parser, ParserStats};
