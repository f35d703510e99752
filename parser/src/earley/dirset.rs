use anyhow::{ensure, Result};

use crate::api::DirectorSetEntry;

/// Answers "can token `token` start a derivation of rule `rule`?".
/// Token codes are given without `TERM_BASE` (0 is EOF).
pub trait DirectorSetOracle: Send + Sync {
    fn contains(&self, rule: i32, token: i32) -> bool;
}

/// Rectangular bitmap indexed by rule number and token code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectorSets {
    num_rules: usize,
    num_tokens: usize,
    words_per_rule: usize,
    bits: Vec<u64>,
}

impl DirectorSets {
    pub fn new(num_rules: usize, num_tokens: usize) -> Self {
        let words_per_rule = (num_tokens + 63) / 64;
        DirectorSets {
            num_rules,
            num_tokens,
            words_per_rule,
            bits: vec![0; num_rules * words_per_rule],
        }
    }

    pub fn from_entries(entries: &[DirectorSetEntry]) -> Result<Self> {
        let mut num_rules = 0;
        let mut num_tokens = 0;
        for e in entries {
            ensure!(e.rule >= 0, "negative rule number {} in director sets", e.rule);
            num_rules = num_rules.max(e.rule as usize + 1);
            for &t in &e.tokens {
                ensure!(t >= 0, "negative token code {} for rule {}", t, e.rule);
                num_tokens = num_tokens.max(t as usize + 1);
            }
        }
        let mut r = Self::new(num_rules, num_tokens);
        for e in entries {
            for &t in &e.tokens {
                r.insert(e.rule, t);
            }
        }
        Ok(r)
    }

    #[inline(always)]
    fn bit(&self, rule: i32, token: i32) -> Option<(usize, u64)> {
        if rule < 0 || token < 0 {
            return None;
        }
        let (rule, token) = (rule as usize, token as usize);
        if rule >= self.num_rules || token >= self.num_tokens {
            return None;
        }
        Some((
            rule * self.words_per_rule + token / 64,
            1u64 << (token % 64),
        ))
    }

    /// Panics if `rule` or `token` lies outside the bitmap.
    pub fn insert(&mut self, rule: i32, token: i32) {
        let (word, mask) = self
            .bit(rule, token)
            .unwrap_or_else(|| panic!("director set entry ({rule}, {token}) out of range"));
        self.bits[word] |= mask;
    }

    pub fn num_rules(&self) -> usize {
        self.num_rules
    }

    pub fn tokens_of(&self, rule: i32) -> Vec<i32> {
        (0..self.num_tokens as i32)
            .filter(|&t| self.contains(rule, t))
            .collect()
    }

    pub fn to_entries(&self) -> Vec<DirectorSetEntry> {
        (0..self.num_rules as i32)
            .map(|rule| DirectorSetEntry {
                rule,
                tokens: self.tokens_of(rule),
            })
            .filter(|e| !e.tokens.is_empty())
            .collect()
    }
}

impl DirectorSetOracle for DirectorSets {
    #[inline(always)]
    fn contains(&self, rule: i32, token: i32) -> bool {
        match self.bit(rule, token) {
            Some((word, mask)) => self.bits[word] & mask != 0,
            None => false,
        }
    }
}
