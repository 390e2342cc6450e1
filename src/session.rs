use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::catalog::Tetromino;
use crate::config::GameSettings;
use crate::engine::{DropResult, LockOutcome, Piece, PieceEngine};
use crate::error::SyncError;
use crate::randomizer::{randomizer_from_kind, validate_seed, BagCursor};
use crate::scoring::drop_interval_ms;
use crate::log;

/// The whole input surface. Device adapters map onto these and nothing else.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    MoveLeft,
    MoveRight,
    SoftDrop,
    HardDrop,
    Rotate,
    Hold,
    Pause,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Waiting,
    /// No current piece; the next tick spawns one.
    Spawning,
    Falling,
    /// The last lock cleared rows; the next tick spawns.
    Clearing,
    GameOver,
}

/// Events are processed strictly in arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Input(Operation),
    Tick { now_ms: u64 },
}

/// Immutable view of one session at one sequence number.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Snapshot {
    pub seq: u64,
    pub phase: Phase,
    pub board: Board,
    pub current_piece: Option<Piece>,
    pub ghost_piece: Option<Piece>,
    pub held_piece: Option<Tetromino>,
    pub can_hold: bool,
    pub next_pieces: Vec<Tetromino>,
    pub bag: BagCursor,
    pub score: u64,
    pub level: u32,
    pub lines: u32,
    pub game_over: bool,
    pub paused: bool,
    pub running: bool,
    #[serde(default)]
    pub last_lock: Option<LockOutcome>,
}

impl Snapshot {
    /// Structural checks for data that came from outside. Board dimensions
    /// are already enforced by the type.
    pub fn validate(&self) -> Result<(), SyncError> {
        for (label, piece) in [("current", &self.current_piece), ("ghost", &self.ghost_piece)] {
            if let Some(piece) = piece {
                if !piece.is_consistent() {
                    return Err(SyncError::InvalidSnapshot(format!(
                        "{label} piece shape does not match {:?} rotation {}",
                        piece.kind(),
                        piece.rotation().index()
                    )));
                }
                if !piece.in_bounds() {
                    return Err(SyncError::InvalidSnapshot(format!(
                        "{label} piece outside the well at ({}, {})",
                        piece.x(),
                        piece.y()
                    )));
                }
            }
        }
        if self.bag.bag_index > 6 {
            return Err(SyncError::InvalidSnapshot(format!(
                "bag index {} out of range",
                self.bag.bag_index
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct GravityTimer {
    last_step_ms: Option<u64>,
}

impl GravityTimer {
    /// Drops any elapsed time; the next tick only sets a new baseline.
    fn restart(&mut self) {
        self.last_step_ms = None;
    }

    fn due(&mut self, now_ms: u64, interval_ms: u64) -> bool {
        match self.last_step_ms {
            None => {
                self.last_step_ms = Some(now_ms);
                false
            }
            Some(last) if now_ms.saturating_sub(last) >= interval_ms => {
                self.last_step_ms = Some(now_ms);
                true
            }
            Some(_) => false,
        }
    }
}

/// One player's game. The single writer of its engine state.
#[derive(Clone)]
pub struct Session {
    settings: GameSettings,
    engine: PieceEngine,
    seed: Option<u64>,
    phase: Phase,
    paused: bool,
    suspended: bool,
    running: bool,
    gravity: GravityTimer,
    seq: u64,
    last_lock: Option<LockOutcome>,
}

impl Session {
    pub fn new(settings: GameSettings) -> Self {
        let engine = PieceEngine::new(
            randomizer_from_kind(&settings.randomizer, 0),
            settings.next_queue_len,
        );
        Self {
            settings,
            engine,
            seed: None,
            phase: Phase::Waiting,
            paused: false,
            suspended: false,
            running: false,
            gravity: GravityTimer::default(),
            seq: 0,
            last_lock: None,
        }
    }

    pub fn settings(&self) -> &GameSettings {
        &self.settings
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn engine(&self) -> &PieceEngine {
        &self.engine
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Starts (or restarts) a game from `seed`. Everything from a previous
    /// game is replaced. The first piece spawns on the first tick.
    pub fn start(&mut self, seed: u64) -> Result<Snapshot, SyncError> {
        let seed = validate_seed(seed)?;
        self.engine = PieceEngine::new(
            randomizer_from_kind(&self.settings.randomizer, seed),
            self.settings.next_queue_len,
        );
        self.seed = Some(seed);
        self.phase = Phase::Spawning;
        self.paused = false;
        self.suspended = false;
        self.running = true;
        self.gravity.restart();
        self.last_lock = None;
        self.seq += 1;
        log(&format!("session started with seed {seed}"));
        Ok(self.snapshot())
    }

    /// Tears the game down. Later ticks and inputs are ignored.
    pub fn end(&mut self) -> Snapshot {
        if self.running {
            let p = self.engine.progress();
            log(&format!(
                "session ended: score {} level {} lines {}",
                p.score, p.level, p.lines
            ));
            self.running = false;
            self.phase = Phase::Waiting;
            self.gravity.restart();
            self.seq += 1;
        }
        self.snapshot()
    }

    /// Freezes gravity and input while the owner has no connection.
    pub fn suspend(&mut self) {
        if self.running && !self.suspended {
            self.suspended = true;
            self.gravity.restart();
        }
    }

    pub fn resume(&mut self) {
        if self.suspended {
            self.suspended = false;
            self.gravity.restart();
        }
    }

    pub fn step(&mut self, event: Event) -> Snapshot {
        match event {
            Event::Input(op) => self.apply(op),
            Event::Tick { now_ms } => self.tick(now_ms),
        };
        self.snapshot()
    }

    /// Applies one player operation. Returns whether any state changed.
    pub fn apply(&mut self, op: Operation) -> bool {
        if !self.running || self.suspended || self.engine.is_game_over() {
            return false;
        }
        if self.paused && op != Operation::Pause {
            return false;
        }
        let changed = match op {
            Operation::Pause => {
                self.paused = !self.paused;
                self.gravity.restart();
                self.seq += 1;
                return true;
            }
            Operation::MoveLeft => self.engine.move_left(),
            Operation::MoveRight => self.engine.move_right(),
            Operation::Rotate => self.engine.rotate_cw(),
            Operation::Hold => self.engine.hold(),
            Operation::SoftDrop => match self.engine.soft_drop() {
                DropResult::Moved => true,
                DropResult::Locked(outcome) => {
                    self.on_lock(outcome);
                    true
                }
                DropResult::Idle => false,
            },
            Operation::HardDrop => match self.engine.hard_drop() {
                Some(outcome) => {
                    self.on_lock(outcome);
                    true
                }
                None => false,
            },
        };
        if changed {
            self.settle();
        }
        changed
    }

    /// Gravity. Spawns when there is no piece, otherwise drops one row once
    /// the level's interval has passed. Returns whether any state changed.
    pub fn tick(&mut self, now_ms: u64) -> bool {
        if !self.running || self.paused || self.suspended || self.engine.is_game_over() {
            return false;
        }
        if self.engine.current().is_none() {
            self.engine.spawn();
            self.gravity.restart();
            self.gravity.due(now_ms, 0);
            self.settle();
            return true;
        }
        let interval = drop_interval_ms(self.engine.progress().level);
        if !self.gravity.due(now_ms, interval) {
            return false;
        }
        if let DropResult::Locked(outcome) = self.engine.soft_drop() {
            self.on_lock(outcome);
        }
        self.settle();
        true
    }

    fn on_lock(&mut self, outcome: LockOutcome) {
        self.last_lock = Some(outcome);
        self.gravity.restart();
    }

    fn settle(&mut self) {
        self.engine.check_game_over();
        self.phase = if self.engine.is_game_over() {
            Phase::GameOver
        } else if self.engine.current().is_some() {
            Phase::Falling
        } else if self.last_lock.is_some_and(|l| l.lines_cleared > 0) {
            Phase::Clearing
        } else {
            Phase::Spawning
        };
        self.seq += 1;
    }

    pub fn snapshot(&self) -> Snapshot {
        let progress = self.engine.progress();
        Snapshot {
            seq: self.seq,
            phase: self.phase,
            board: self.engine.board().clone(),
            current_piece: self.engine.current().cloned(),
            ghost_piece: self.engine.ghost().cloned(),
            held_piece: self.engine.held(),
            can_hold: self.engine.can_hold(),
            next_pieces: self.engine.next_queue(),
            bag: self.engine.cursor(),
            score: progress.score,
            level: progress.level,
            lines: progress.lines,
            game_over: self.engine.is_game_over(),
            paused: self.paused,
            running: self.running,
            last_lock: self.last_lock,
        }
    }

    #[cfg(test)]
    pub(crate) fn engine_mut(&mut self) -> &mut PieceEngine {
        &mut self.engine
    }
}
