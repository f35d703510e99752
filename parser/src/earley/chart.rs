use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::api::ParserLimits;

use super::parser::ParseError;

/// Number of one-bit entries in the per-list presence filter.
pub const HSIZE: usize = 1024;

/// An Earley item.
///
/// `dot` is the grammar index of the working point, `back` the index of the
/// list where processing of the rule started, `left` the item for the
/// preceding rhs member and `sub` the completed item that recognized the
/// preceding nonterminal. The last two encode the shared parse forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Item {
    pub dot: usize,
    pub back: usize,
    pub left: usize,
    pub sub: usize,
}

impl Item {
    pub const TERMINATOR: Item = Item {
        dot: 0,
        back: 0,
        left: 0,
        sub: 0,
    };

    pub fn new(dot: usize, back: usize, left: usize, sub: usize) -> Self {
        Item {
            dot,
            back,
            left,
            sub,
        }
    }

    #[inline(always)]
    pub fn is_terminator(&self) -> bool {
        self.dot == 0 && self.sub == 0
    }
}

/// Presence filter keyed on `(dot, back)`. A clear bit proves the pair is
/// not in the current list; a set bit only says it might be.
#[derive(Clone)]
struct HashFilter {
    bits: [u64; HSIZE / 64],
}

impl HashFilter {
    fn new() -> Self {
        HashFilter {
            bits: [0; HSIZE / 64],
        }
    }

    #[inline(always)]
    fn code(dot: usize, back: usize) -> usize {
        ((back % 8) + dot) % HSIZE
    }

    fn clear(&mut self) {
        self.bits = [0; HSIZE / 64];
    }

    #[inline(always)]
    fn contains(&self, dot: usize, back: usize) -> bool {
        let c = Self::code(dot, back);
        self.bits[c / 64] & (1 << (c % 64)) != 0
    }

    #[inline(always)]
    fn insert(&mut self, dot: usize, back: usize) {
        let c = Self::code(dot, back);
        self.bits[c / 64] |= 1 << (c % 64);
    }
}

/// Outcome of adding an item to the current list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Added,
    Duplicate,
    /// An item with the same dot and back but a different `left` exists
    /// at the given index.
    Conjunctive(usize),
    /// Same dot, back and left, different `sub`.
    Disjunctive(usize),
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChartStats {
    pub items: usize,
    pub hash_misses: usize,
    pub searches: usize,
    pub duplicates: usize,
    pub growths: usize,
}

/// The item arena. Index 0 is null, lists are separated by terminator items
/// and the slot after the last item is always available as a sentinel.
#[derive(Clone)]
pub struct Chart {
    items: Vec<Item>,
    this_list: usize,
    last_item: usize,
    hash: HashFilter,
    increment: usize,
    max_items: usize,
    stats: ChartStats,
}

impl Chart {
    pub fn new(limits: &ParserLimits) -> Result<Self> {
        let increment = limits.item_increment.max(2);
        let mut items = Vec::new();
        items
            .try_reserve_exact(increment)
            .map_err(|_| ParseError::OutOfMemory)?;
        // null item and the first sentinel slot
        items.push(Item::TERMINATOR);
        items.push(Item::TERMINATOR);
        Ok(Chart {
            items,
            this_list: 1,
            last_item: 0,
            hash: HashFilter::new(),
            increment,
            max_items: limits.max_items,
            stats: ChartStats::default(),
        })
    }

    #[inline(always)]
    pub fn item(&self, idx: usize) -> Item {
        self.items[idx]
    }

    #[inline(always)]
    pub fn dot(&self, idx: usize) -> usize {
        self.items[idx].dot
    }

    #[inline(always)]
    pub fn left(&self, idx: usize) -> usize {
        self.items[idx].left
    }

    #[inline(always)]
    pub fn sub(&self, idx: usize) -> usize {
        self.items[idx].sub
    }

    /// First item of the current list.
    #[inline(always)]
    pub fn this_list(&self) -> usize {
        self.this_list
    }

    #[inline(always)]
    pub fn last_item(&self) -> usize {
        self.last_item
    }

    /// Index of the sentinel slot, which holds the tentative item
    /// during an insertion.
    #[inline(always)]
    pub fn sentinel(&self) -> usize {
        self.last_item + 1
    }

    pub fn stats(&self) -> &ChartStats {
        &self.stats
    }

    /// Items of the list starting at `list`, up to its terminator.
    pub fn list_items(&self, list: usize) -> impl Iterator<Item = usize> + '_ {
        (list..=self.last_item).take_while(move |&i| !self.items[i].is_terminator())
    }

    /// Start the very first list.
    pub fn begin_initial(&mut self) {
        self.hash.clear();
        self.this_list = 1;
        self.last_item = 0;
    }

    /// Start a new list after the current one; returns the previous list.
    pub fn begin_list(&mut self) -> usize {
        self.hash.clear();
        let prev = self.this_list;
        self.this_list = self.last_item + 1;
        prev
    }

    /// Forget everything after `last_item` and make `this_list` current.
    /// The storage is kept.
    pub fn rewind(&mut self, this_list: usize, last_item: usize) {
        self.this_list = this_list;
        self.last_item = last_item;
    }

    /// Make sure the sentinel slot exists, growing the arena by one
    /// increment when it is full.
    fn ensure_sentinel(&mut self) -> Result<()> {
        if self.last_item >= self.max_items {
            return Err(ParseError::OutOfMemory.into());
        }
        while self.items.len() <= self.last_item + 1 {
            if self.items.len() == self.items.capacity() {
                self.items
                    .try_reserve_exact(self.increment)
                    .map_err(|_| ParseError::OutOfMemory)?;
                self.stats.growths += 1;
            }
            self.items.push(Item::TERMINATOR);
        }
        Ok(())
    }

    fn commit(&mut self, item: Item) -> Result<()> {
        self.last_item += 1;
        self.hash.insert(item.dot, item.back);
        self.stats.items += 1;
        self.ensure_sentinel()
    }

    /// Mark the sentinel slot as a list end, so scans over the current list
    /// stop there.
    #[inline(always)]
    pub fn clear_sentinel(&mut self) {
        let s = self.sentinel();
        self.items[s].dot = 0;
    }

    /// Add `item` to the current list unless an item with the same dot and
    /// back is already there; in that case report how the two differ.
    pub fn insert(&mut self, item: Item, hashing: bool) -> Result<Insertion> {
        let slot = self.sentinel();
        self.items[slot] = item;

        if hashing && !self.hash.contains(item.dot, item.back) {
            self.stats.hash_misses += 1;
            self.commit(item)?;
            return Ok(Insertion::Added);
        }

        self.stats.searches += 1;
        let mut i = self.this_list;
        while self.items[i].dot != item.dot || self.items[i].back != item.back {
            i += 1;
        }

        if i == slot {
            self.commit(item)?;
            return Ok(Insertion::Added);
        }

        let old = self.items[i];
        if old.left != item.left {
            Ok(Insertion::Conjunctive(i))
        } else if old.sub != item.sub {
            Ok(Insertion::Disjunctive(i))
        } else {
            self.stats.duplicates += 1;
            Ok(Insertion::Duplicate)
        }
    }

    /// Close the current list.
    pub fn push_terminator(&mut self) -> Result<()> {
        let slot = self.sentinel();
        self.items[slot] = Item::TERMINATOR;
        self.last_item += 1;
        self.ensure_sentinel()
    }

    /// Replace the forest links of an existing item.
    pub fn set_links(&mut self, idx: usize, left: usize, sub: usize) {
        self.items[idx].left = left;
        self.items[idx].sub = sub;
    }

    pub fn set_sub(&mut self, idx: usize, sub: usize) {
        self.items[idx].sub = sub;
    }

    /// Does walking `left` and `sub` links from `root` reach `target`?
    /// Links only point backwards, so anything below `target` is skipped.
    pub fn reaches(&self, target: usize, root: usize) -> bool {
        let mut todo = vec![root];
        while let Some(i) = todo.pop() {
            if i < target {
                continue;
            }
            if i == target {
                return true;
            }
            let it = self.items[i];
            if it.left != 0 {
                todo.push(it.left);
            }
            if it.sub != 0 {
                todo.push(it.sub);
            }
        }
        false
    }
}
