//! Storage and printing support for code that runs on the derivation:
//! a bump heap for terms, a block-chained control arena with choice points,
//! and a pretty printer for terms.

use std::{
    fmt,
    ops::{Deref, DerefMut},
};

use anyhow::{bail, Result};

use crate::earley::ParseError;

pub type Word = i64;

pub const HEAP_PIECE: usize = 20_000;
const HEAP_RESERVE: usize = 100;

pub const CNTL_MAX: usize = 500;
const CNTL_SLACK: usize = 200;

const STRING_LENGTH: usize = 40;

/// Location of a heap allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRef {
    piece: usize,
    offset: usize,
    len: usize,
}

/// Bump allocator working in pieces of `HEAP_PIECE` words. A new piece is
/// started once fewer than 100 words are left in the current one; nothing
/// is ever freed.
#[derive(Debug, Default)]
pub struct HeapPiece {
    pieces: Vec<Vec<Word>>,
    used: usize,
}

impl HeapPiece {
    pub fn new() -> Result<Self> {
        let mut h = HeapPiece::default();
        h.extend()?;
        Ok(h)
    }

    fn extend(&mut self) -> Result<()> {
        let mut piece = Vec::new();
        piece
            .try_reserve_exact(HEAP_PIECE)
            .map_err(|_| ParseError::OutOfMemory)?;
        piece.resize(HEAP_PIECE, 0);
        self.pieces.push(piece);
        self.used = 0;
        Ok(())
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn alloc(&mut self, n: usize) -> Result<HeapRef> {
        if n > HEAP_PIECE {
            bail!("heap allocation of {} words exceeds piece size", n);
        }
        if self.used > HEAP_PIECE - HEAP_RESERVE || self.used + n > HEAP_PIECE {
            self.extend()?;
        }
        let r = HeapRef {
            piece: self.pieces.len() - 1,
            offset: self.used,
            len: n,
        };
        self.used += n;
        Ok(r)
    }

    pub fn get(&self, r: HeapRef) -> &[Word] {
        &self.pieces[r.piece][r.offset..r.offset + r.len]
    }

    pub fn get_mut(&mut self, r: HeapRef) -> &mut [Word] {
        &mut self.pieces[r.piece][r.offset..r.offset + r.len]
    }
}

struct Block {
    words: Vec<Word>,
    next: Option<usize>,
}

/// Location of a control-arena allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CntlRef {
    block: usize,
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Position {
    first_block: usize,
    cur_block: usize,
    cur_pos: usize,
}

/// Arena of fixed blocks chained from a first block. Choice points move
/// allocation to a fresh chain and release it as a whole when they end.
pub struct ControlArena {
    blocks: Vec<Block>,
    free: Vec<usize>,
    pos: Position,
}

impl ControlArena {
    pub fn new() -> Result<Self> {
        let mut a = ControlArena {
            blocks: vec![],
            free: vec![],
            pos: Position {
                first_block: 0,
                cur_block: 0,
                cur_pos: 1,
            },
        };
        let b = a.new_block()?;
        a.pos.first_block = b;
        a.pos.cur_block = b;
        Ok(a)
    }

    fn new_block(&mut self) -> Result<usize> {
        if let Some(b) = self.free.pop() {
            self.blocks[b].next = None;
            return Ok(b);
        }
        let mut words = Vec::new();
        words
            .try_reserve_exact(CNTL_MAX + CNTL_SLACK)
            .map_err(|_| ParseError::OutOfMemory)?;
        words.resize(CNTL_MAX + CNTL_SLACK, 0);
        self.blocks.push(Block { words, next: None });
        Ok(self.blocks.len() - 1)
    }

    /// Blocks allocated so far, live or free.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_free_blocks(&self) -> usize {
        self.free.len()
    }

    /// Number of blocks in the chain currently allocated from.
    pub fn chain_len(&self) -> usize {
        let mut n = 0;
        let mut b = Some(self.pos.first_block);
        while let Some(i) = b {
            n += 1;
            b = self.blocks[i].next;
        }
        n
    }

    pub fn alloc(&mut self, n: usize) -> Result<CntlRef> {
        if n >= CNTL_MAX + CNTL_SLACK {
            bail!("control allocation of {} words exceeds block size", n);
        }
        if self.pos.cur_pos + n >= CNTL_MAX {
            let b = self.new_block()?;
            self.blocks[self.pos.cur_block].next = Some(b);
            self.pos.cur_block = b;
            self.pos.cur_pos = 1;
        }
        let r = CntlRef {
            block: self.pos.cur_block,
            offset: self.pos.cur_pos,
            len: n,
        };
        self.pos.cur_pos += n;
        Ok(r)
    }

    pub fn get(&self, r: CntlRef) -> &[Word] {
        &self.blocks[r.block].words[r.offset..r.offset + r.len]
    }

    pub fn get_mut(&mut self, r: CntlRef) -> &mut [Word] {
        &mut self.blocks[r.block].words[r.offset..r.offset + r.len]
    }

    /// Allocate from a fresh chain until the returned guard ends.
    pub fn begin_choice(&mut self) -> Result<Choice<'_>> {
        let saved = self.pos;
        let b = self.new_block()?;
        self.pos = Position {
            first_block: b,
            cur_block: b,
            cur_pos: 1,
        };
        Ok(Choice {
            arena: self,
            saved,
            ended: false,
        })
    }

    fn release(&mut self, saved: Position) {
        let mut b = Some(self.pos.first_block);
        while let Some(i) = b {
            b = self.blocks[i].next.take();
            self.free.push(i);
        }
        self.pos = saved;
    }
}

/// Scope of a choice point. Everything allocated through it is released
/// when it ends, explicitly or by being dropped.
pub struct Choice<'a> {
    arena: &'a mut ControlArena,
    saved: Position,
    ended: bool,
}

impl Choice<'_> {
    pub fn end_choice(mut self) {
        self.arena.release(self.saved);
        self.ended = true;
    }
}

impl Deref for Choice<'_> {
    type Target = ControlArena;

    fn deref(&self) -> &ControlArena {
        &*self.arena
    }
}

impl DerefMut for Choice<'_> {
    fn deref_mut(&mut self) -> &mut ControlArena {
        &mut *self.arena
    }
}

impl Drop for Choice<'_> {
    fn drop(&mut self) {
        if !self.ended {
            self.arena.release(self.saved);
        }
    }
}

/// Abort raised by runtime code, with the grammar file and line it
/// originates from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub code: i32,
    pub file: String,
    pub line: u32,
}

impl RuntimeError {
    pub const UNDEFINED_VALUE: i32 = 1;
    pub const NO_RULE_APPLICABLE: i32 = 2;
    pub const GRAMMAR_RULE_FAILED: i32 = 3;
    pub const CHOICE_RULE_FAILED: i32 = 4;

    pub fn new(code: i32, file: &str, line: u32) -> Self {
        RuntimeError {
            code,
            file: file.to_string(),
            line,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Self::UNDEFINED_VALUE => write!(f, "Undefined value")?,
            Self::NO_RULE_APPLICABLE => write!(f, "No rule applicable")?,
            Self::GRAMMAR_RULE_FAILED => write!(f, "Selected grammar rule failed")?,
            Self::CHOICE_RULE_FAILED => write!(f, "Selected CHOICE rule failed")?,
            code => write!(f, "Error {} (?)", code)?,
        }
        write!(f, " in \"{}.g\", line {}", self.file, self.line)
    }
}

impl std::error::Error for RuntimeError {}

/// Pretty printer for terms: arguments go on their own lines, indented by
/// three spaces per level.
pub struct TermPrinter<W: fmt::Write> {
    out: W,
    indentation: usize,
}

impl<W: fmt::Write> TermPrinter<W> {
    pub fn new(out: W) -> Self {
        TermPrinter {
            out,
            indentation: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn indent(&mut self) -> fmt::Result {
        for _ in 0..self.indentation {
            self.out.write_str("   ")?;
        }
        Ok(())
    }

    pub fn term(&mut self, functor: &str) -> fmt::Result {
        self.out.write_str(functor)
    }

    pub fn first_arg(&mut self) -> fmt::Result {
        self.out.write_str("(\n")?;
        self.indentation += 1;
        self.indent()
    }

    pub fn next_arg(&mut self) -> fmt::Result {
        self.out.write_str(",\n")?;
        self.indent()
    }

    pub fn end_args(&mut self) -> fmt::Result {
        self.indentation = self.indentation.saturating_sub(1);
        self.out.write_str("\n")?;
        self.indent()?;
        self.out.write_str(")")
    }

    pub fn no_args(&mut self) -> fmt::Result {
        Ok(())
    }

    pub fn end_print(&mut self) -> fmt::Result {
        self.out.write_str("\n")
    }

    pub fn opaque(&mut self, i: Word) -> fmt::Result {
        write!(self.out, "<<{}>>", i)
    }

    pub fn index(&mut self, i: Word) -> fmt::Result {
        write!(self.out, "#{}", i)
    }

    pub fn int(&mut self, i: Word) -> fmt::Result {
        write!(self.out, "{}", i)
    }

    pub fn pos(&mut self, i: Word) -> fmt::Result {
        write!(self.out, "{}", i)
    }

    pub fn string(&mut self, s: &str) -> fmt::Result {
        write!(self.out, "\"{}\"", escape_string(s))
    }
}

/// Escape backslashes, newlines and quotes; long strings are cut short
/// with `...`.
pub fn escape_string(s: &str) -> String {
    let mut r = String::new();
    for c in s.chars() {
        if r.len() > STRING_LENGTH - 4 {
            r.push_str("...");
            break;
        }
        match c {
            '\\' => r.push_str("\\\\"),
            '\n' => r.push_str("\\n"),
            '"' => r.push_str("\\\""),
            c => r.push(c),
        }
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_starts_new_piece_near_the_end() {
        let mut h = HeapPiece::new().unwrap();
        let a = h.alloc(HEAP_PIECE - HEAP_RESERVE).unwrap();
        h.get_mut(a)[0] = 7;
        assert_eq!(h.num_pieces(), 1);
        // still within the reserve
        let b = h.alloc(10).unwrap();
        assert_eq!(h.num_pieces(), 1);
        let c = h.alloc(10).unwrap();
        assert_eq!(h.num_pieces(), 2);
        assert_ne!(b, c);
        assert_eq!(h.get(a)[0], 7);
        assert!(h.alloc(HEAP_PIECE + 1).is_err());
    }

    #[test]
    fn test_control_blocks_chain() {
        let mut a = ControlArena::new().unwrap();
        for _ in 0..10 {
            a.alloc(100).unwrap();
        }
        assert!(a.chain_len() >= 2);
        let r = a.alloc(3).unwrap();
        a.get_mut(r).copy_from_slice(&[1, 2, 3]);
        assert_eq!(a.get(r), &[1, 2, 3]);
    }

    #[test]
    fn test_choice_releases_its_chain() {
        let mut a = ControlArena::new().unwrap();
        let before = a.alloc(5).unwrap();
        {
            let mut c = a.begin_choice().unwrap();
            for _ in 0..20 {
                c.alloc(50).unwrap();
            }
            assert!(c.chain_len() > 1);
            c.end_choice();
        }
        assert_eq!(a.chain_len(), 1);
        let blocks = a.num_blocks();
        assert_eq!(a.num_free_blocks(), blocks - 1);

        // dropped without end_choice, e.g. on an early return
        {
            let mut c = a.begin_choice().unwrap();
            c.alloc(400).unwrap();
            c.alloc(400).unwrap();
        }
        assert_eq!(a.num_blocks(), blocks);
        let after = a.alloc(5).unwrap();
        assert_eq!(after.block, before.block);
        assert_eq!(after.offset, before.offset + 5);
    }

    #[test]
    fn test_nested_choices() {
        let mut a = ControlArena::new().unwrap();
        let mut outer = a.begin_choice().unwrap();
        let x = outer.alloc(2).unwrap();
        {
            let mut inner = outer.begin_choice().unwrap();
            inner.alloc(2).unwrap();
        }
        let y = outer.alloc(2).unwrap();
        assert_eq!(y.offset, x.offset + 2);
        outer.end_choice();
        assert_eq!(a.chain_len(), 1);
    }

    #[test]
    fn test_runtime_error_messages() {
        assert_eq!(
            RuntimeError::new(1, "amber", 12).to_string(),
            "Undefined value in \"amber.g\", line 12"
        );
        assert_eq!(
            RuntimeError::new(4, "amber", 3).to_string(),
            "Selected CHOICE rule failed in \"amber.g\", line 3"
        );
        assert_eq!(
            RuntimeError::new(9, "amber", 1).to_string(),
            "Error 9 (?) in \"amber.g\", line 1"
        );
    }

    #[test]
    fn test_term_printer() {
        let mut p = TermPrinter::new(String::new());
        p.term("pair").unwrap();
        p.first_arg().unwrap();
        p.int(1).unwrap();
        p.next_arg().unwrap();
        p.term("leaf").unwrap();
        p.first_arg().unwrap();
        p.string("a\"b").unwrap();
        p.end_args().unwrap();
        p.next_arg().unwrap();
        p.opaque(5).unwrap();
        p.end_args().unwrap();
        p.end_print().unwrap();
        assert_eq!(
            p.into_inner(),
            "pair(\n   1,\n   leaf(\n      \"a\\\"b\"\n   ),\n   <<5>>\n)\n"
        );
    }

    #[test]
    fn test_escape_truncates() {
        assert_eq!(escape_string("a\\b\nc"), "a\\\\b\\nc");
        let long = "x".repeat(60);
        let e = escape_string(&long);
        assert_eq!(e, format!("{}...", "x".repeat(37)));
    }
}
