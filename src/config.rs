use serde::{Deserialize, Serialize};

use crate::randomizer::RandomizerKind;

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct GameSettings {
    pub next_queue_len: usize,
    pub randomizer: RandomizerKind,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            next_queue_len: 5,
            randomizer: RandomizerKind::SevenBag,
        }
    }
}

/// Observer-side tuning. None of these are part of the wire contract.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub desync_check_interval_ms: u64,
    /// Consecutive checks a running game may show no current piece before
    /// it counts as a desync.
    pub null_piece_grace_checks: u32,
    /// Rows below the spawn row that still count as "never moved".
    pub spawn_row_tolerance: i32,
    /// Authority sends deltas instead of full snapshots when it can.
    pub use_deltas: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            desync_check_interval_ms: 3000,
            null_piece_grace_checks: 1,
            spawn_row_tolerance: 1,
            use_deltas: true,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub game: GameSettings,
    pub sync: SyncSettings,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
