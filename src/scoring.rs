use serde::{Deserialize, Serialize};

const LINE_SCORES: [u64; 5] = [0, 100, 300, 500, 800];
const LINES_PER_LEVEL: u32 = 10;

pub const MIN_DROP_INTERVAL_MS: u64 = 50;
pub const MAX_DROP_INTERVAL_MS: u64 = 1000;

fn level_group(level: u32) -> u64 {
    (level / 2) as u64
}

/// `floor(base * (1 + group * 0.5))`, kept in integers.
pub fn line_clear_score(lines: u32, level: u32) -> u64 {
    let base = LINE_SCORES[(lines as usize).min(LINE_SCORES.len() - 1)];
    base * (2 + level_group(level)) / 2
}

/// `floor(distance * 2 * (1 + group * 0.3))`, kept in integers.
pub fn hard_drop_bonus(distance: u32, level: u32) -> u64 {
    distance as u64 * 2 * (10 + 3 * level_group(level)) / 10
}

pub fn calculate_level(total_lines: u32) -> u32 {
    total_lines / LINES_PER_LEVEL
}

/// Gravity period for a level, clamped to [50, 1000] ms.
pub fn drop_interval_ms(level: u32) -> u64 {
    if level == 0 {
        return MAX_DROP_INTERVAL_MS;
    }
    if level >= 29 {
        return MIN_DROP_INTERVAL_MS;
    }
    let steps = (level - 1) as f64;
    let interval = (0.8 - steps * 0.007).powf(steps) * 1000.0;
    (interval as u64).clamp(MIN_DROP_INTERVAL_MS, MAX_DROP_INTERVAL_MS)
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct Progress {
    pub score: u64,
    pub level: u32,
    pub lines: u32,
}

impl Progress {
    /// Scores one lock at the level in force before it. The level is only
    /// recomputed when the lock cleared something.
    pub fn record_lock(&mut self, lines_cleared: u32, hard_drop_distance: Option<u32>) -> u64 {
        let mut delta = line_clear_score(lines_cleared, self.level);
        if let Some(distance) = hard_drop_distance {
            delta += hard_drop_bonus(distance, self.level);
        }
        self.score += delta;
        if lines_cleared > 0 {
            self.lines += lines_cleared;
            self.level = calculate_level(self.lines);
        }
        delta
    }
}
