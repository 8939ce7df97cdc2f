//! Deterministic synthetic record generation.
//!
//! Records vary in size the same way the original benchmark client's did:
//! - name: 5..=50 ASCII letters
//! - age: 18..=80
//! - email: 5..=20 letters followed by `@test.com`
//! - tags: 0..=10 tags of 5 letters each
//!
//! The sequence is a pure function of the seed, so two runs with the same
//! seed send byte-identical payloads.

use crate::record::Record;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Finite, restartable iterator of generated records.
#[derive(Debug, Clone)]
pub struct RecordGenerator {
    seed: u64,
    len: u64,
    produced: u64,
    rng: ChaCha8Rng,
}

impl RecordGenerator {
    /// Create a generator yielding `len` records derived from `seed`.
    pub fn new(seed: u64, len: u64) -> Self {
        Self {
            seed,
            len,
            produced: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Rewind to the first record.
    pub fn restart(&mut self) {
        self.produced = 0;
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
    }

    fn letters(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| LETTERS[self.rng.gen_range(0..LETTERS.len())] as char)
            .collect()
    }

    fn generate(&mut self) -> Record {
        let name_len = self.rng.gen_range(5..=50);
        let name = self.letters(name_len);
        let age = self.rng.gen_range(18..=80);
        let email_len = self.rng.gen_range(5..=20);
        let email = format!("{}@test.com", self.letters(email_len));
        let tag_count = self.rng.gen_range(0..=10);
        let tags = (0..tag_count).map(|_| self.letters(5)).collect();

        Record {
            name,
            age,
            email: Some(email),
            tags,
        }
    }
}

impl Iterator for RecordGenerator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        if self.produced >= self.len {
            return None;
        }
        self.produced += 1;
        Some(self.generate())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.len - self.produced).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

impl ExactSizeIterator for RecordGenerator {}
