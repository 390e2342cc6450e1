use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::Tetromino;
use crate::error::SyncError;

/// Seeds have to survive a trip through a JavaScript number.
pub const MAX_SEED: u64 = (1 << 53) - 1;

pub fn validate_seed(seed: u64) -> Result<u64, SyncError> {
    if seed > MAX_SEED {
        return Err(SyncError::InvalidSeed(seed));
    }
    Ok(seed)
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RandomizerKind {
    #[default]
    SevenBag,
    SinglePiece {
        piece: Tetromino,
    },
}

/// Position of the next draw: which bag, and how far into it.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct BagCursor {
    pub bag_number: u64,
    pub bag_index: u8,
}

pub trait Randomizer: Send {
    fn next(&mut self) -> Tetromino;
    /// Lookahead that leaves the generator untouched.
    fn peek(&self, n: usize) -> Vec<Tetromino>;
    fn cursor(&self) -> BagCursor;
    fn box_clone(&self) -> Box<dyn Randomizer>;
}

impl Clone for Box<dyn Randomizer> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

#[derive(Clone, Debug)]
pub struct SevenBag {
    seed: u64,
    cursor: BagCursor,
    bag: [Tetromino; 7],
}

impl SevenBag {
    pub fn new(seed: u64) -> Self {
        Self::at(seed, BagCursor::default())
    }

    /// Rebuilds the generator as it stands after reaching `cursor`.
    pub fn at(seed: u64, cursor: BagCursor) -> Self {
        Self {
            seed,
            cursor: BagCursor {
                bag_number: cursor.bag_number,
                bag_index: cursor.bag_index.min(6),
            },
            bag: Self::shuffled(seed, cursor.bag_number),
        }
    }

    pub fn initialize(&mut self, seed: u64) {
        self.seed = seed;
        self.cursor = BagCursor::default();
        self.bag = Self::shuffled(seed, 0);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    // Each bag gets its own ChaCha stream so any bag can be rebuilt from
    // (seed, bag_number) alone.
    fn shuffled(seed: u64, bag_number: u64) -> [Tetromino; 7] {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(bag_number);
        let mut bag = Tetromino::all();
        bag.shuffle(&mut rng);
        bag
    }
}

impl Randomizer for SevenBag {
    fn next(&mut self) -> Tetromino {
        let piece = self.bag[self.cursor.bag_index as usize];
        self.cursor.bag_index += 1;
        if self.cursor.bag_index as usize == self.bag.len() {
            self.cursor.bag_number += 1;
            self.cursor.bag_index = 0;
            self.bag = Self::shuffled(self.seed, self.cursor.bag_number);
        }
        piece
    }

    fn peek(&self, n: usize) -> Vec<Tetromino> {
        let mut sim = self.clone();
        (0..n).map(|_| sim.next()).collect()
    }

    fn cursor(&self) -> BagCursor {
        self.cursor
    }

    fn box_clone(&self) -> Box<dyn Randomizer> {
        Box::new(self.clone())
    }
}

#[derive(Clone, Debug)]
pub struct SinglePiece {
    piece: Tetromino,
}

impl Randomizer for SinglePiece {
    fn next(&mut self) -> Tetromino {
        self.piece
    }

    fn peek(&self, n: usize) -> Vec<Tetromino> {
        vec![self.piece; n]
    }

    fn cursor(&self) -> BagCursor {
        BagCursor::default()
    }

    fn box_clone(&self) -> Box<dyn Randomizer> {
        Box::new(self.clone())
    }
}

pub fn randomizer_from_kind(kind: &RandomizerKind, seed: u64) -> Box<dyn Randomizer> {
    match kind {
        RandomizerKind::SevenBag => Box::new(SevenBag::new(seed)),
        RandomizerKind::SinglePiece { piece } => Box::new(SinglePiece { piece: *piece }),
    }
}

/// What an observer expects the preview to be, given the announced seed and
/// the cursor carried by a snapshot.
pub fn project_queue(kind: &RandomizerKind, seed: u64, cursor: BagCursor, n: usize) -> Vec<Tetromino> {
    match kind {
        RandomizerKind::SevenBag => SevenBag::at(seed, cursor).peek(n),
        RandomizerKind::SinglePiece { piece } => vec![*piece; n],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SevenBag::new(42);
        let mut b = SevenBag::new(42);
        let xs: Vec<_> = (0..50).map(|_| a.next()).collect();
        let ys: Vec<_> = (0..50).map(|_| b.next()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn each_bag_is_a_permutation() {
        let mut bag = SevenBag::new(7);
        for _ in 0..10 {
            let drawn: HashSet<_> = (0..7).map(|_| bag.next()).collect();
            assert_eq!(drawn.len(), 7);
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let mut bag = SevenBag::new(9);
        let before = bag.cursor();
        let preview = bag.peek(12);
        assert_eq!(bag.cursor(), before);
        let drawn: Vec<_> = (0..12).map(|_| bag.next()).collect();
        assert_eq!(preview, drawn);
    }

    #[test]
    fn rebuild_from_cursor_continues_the_sequence() {
        let mut bag = SevenBag::new(1234);
        for _ in 0..10 {
            bag.next();
        }
        let cursor = bag.cursor();
        assert_eq!(cursor, BagCursor { bag_number: 1, bag_index: 3 });
        assert_eq!(SevenBag::at(1234, cursor).peek(9), bag.peek(9));
    }

    #[test]
    fn initialize_resets_to_first_bag() {
        let mut bag = SevenBag::new(5);
        let first: Vec<_> = bag.peek(7);
        for _ in 0..4 {
            bag.next();
        }
        bag.initialize(5);
        assert_eq!(bag.cursor(), BagCursor::default());
        assert_eq!(bag.peek(7), first);
    }

    #[test]
    fn seeds_beyond_js_precision_are_rejected() {
        assert!(validate_seed(MAX_SEED).is_ok());
        assert!(matches!(validate_seed(MAX_SEED + 1), Err(SyncError::InvalidSeed(_))));
    }
}
