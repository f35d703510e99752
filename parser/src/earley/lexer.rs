use anyhow::{bail, Result};

use crate::api::MAX_CHAR;

/// Token source for the recognizer.
///
/// `next_token` returns token codes without `TERM_BASE`: 0 is end of input,
/// `1..=MAX_CHAR` are character tokens, larger codes are named tokens.
/// After each call `pos` and `value` describe the token just returned.
pub trait Lexer {
    type Value: Clone;

    fn next_token(&mut self) -> Result<i32>;
    fn pos(&self) -> i64;
    fn value(&self) -> Self::Value;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexval<V> {
    pub value: V,
    pub pos: i64,
}

/// Semantic values of the tokens in reading order, handed to the tree
/// walker after recognition.
#[derive(Debug, Clone)]
pub struct LexvalStream<V> {
    records: Vec<Lexval<V>>,
    cursor: usize,
}

impl<V> Default for LexvalStream<V> {
    fn default() -> Self {
        LexvalStream {
            records: vec![],
            cursor: 0,
        }
    }
}

impl<V> LexvalStream<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new stream with the value of the first token.
    pub fn first_lexval(&mut self, value: V, pos: i64) {
        self.records.clear();
        self.cursor = 0;
        self.records.push(Lexval { value, pos });
    }

    pub fn next_lexval(&mut self, value: V, pos: i64) {
        self.records.push(Lexval { value, pos });
    }

    /// The next unconsumed record.
    pub fn get_lexval(&mut self) -> Option<&Lexval<V>> {
        let r = self.records.get(self.cursor)?;
        self.cursor += 1;
        Some(r)
    }

    /// Make every record available again.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Lexval<V>] {
        &self.records
    }
}

/// Each non-whitespace character is a token of its own. Positions are
/// 1-based character offsets; the end of input sits one past the last
/// character.
#[derive(Debug, Clone)]
pub struct CharLexer {
    chars: Vec<char>,
    next: usize,
    pos: i64,
    value: Option<char>,
}

impl CharLexer {
    pub fn new(input: &str) -> Self {
        CharLexer {
            chars: input.chars().collect(),
            next: 0,
            pos: 0,
            value: None,
        }
    }
}

impl Lexer for CharLexer {
    type Value = Option<char>;

    fn next_token(&mut self) -> Result<i32> {
        while self.next < self.chars.len() && self.chars[self.next].is_whitespace() {
            self.next += 1;
        }
        if self.next >= self.chars.len() {
            self.pos = self.chars.len() as i64 + 1;
            self.value = None;
            return Ok(0);
        }
        let c = self.chars[self.next];
        self.next += 1;
        self.pos = self.next as i64;
        let code = c as u32;
        if code == 0 || code > MAX_CHAR as u32 {
            bail!("character {:?} at position {} is not a valid token", c, self.pos);
        }
        self.value = Some(c);
        Ok(code as i32)
    }

    fn pos(&self) -> i64 {
        self.pos
    }

    fn value(&self) -> Option<char> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<(i32, i64)> {
        let mut lex = CharLexer::new(input);
        let mut r = vec![];
        loop {
            let t = lex.next_token().unwrap();
            r.push((t, lex.pos()));
            if t == 0 {
                break;
            }
        }
        r
    }

    #[test]
    fn test_char_lexer_positions() {
        assert_eq!(tokens(""), vec![(0, 1)]);
        assert_eq!(tokens("x"), vec![(120, 1), (0, 2)]);
        assert_eq!(tokens(" x\ny "), vec![(120, 2), (121, 4), (0, 6)]);
    }

    #[test]
    fn test_char_lexer_rejects_wide_chars() {
        let mut lex = CharLexer::new("\u{1F600}");
        assert!(lex.next_token().is_err());
    }

    #[test]
    fn test_lexval_stream_rewinds() {
        let mut s = LexvalStream::new();
        s.first_lexval('a', 1);
        s.next_lexval('b', 2);
        assert_eq!(s.get_lexval().unwrap().value, 'a');
        assert_eq!(s.get_lexval().unwrap().pos, 2);
        assert!(s.get_lexval().is_none());
        s.rewind();
        assert_eq!(s.get_lexval().unwrap().value, 'a');
        assert_eq!(s.len(), 2);
    }
}
