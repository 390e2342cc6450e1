use serde::{Deserialize, Serialize};

use crate::board::{Board, BOARD_HEIGHT, BOARD_WIDTH};
use crate::catalog::{self, KickTable, Rotation, Shape, Tetromino};
use crate::randomizer::{BagCursor, Randomizer};
use crate::scoring::Progress;
use crate::warn;

/// A falling piece. `shape` always mirrors the catalog entry for
/// (`kind`, `rotation`); the fields are private so it cannot drift.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Piece {
    #[serde(rename = "type")]
    kind: Tetromino,
    x: i32,
    y: i32,
    rotation: Rotation,
    shape: Shape,
}

impl Piece {
    pub fn spawn(kind: Tetromino) -> Self {
        let (x, y) = kind.spawn_position();
        Self::new(kind, x, y, Rotation::Spawn)
    }

    pub fn new(kind: Tetromino, x: i32, y: i32, rotation: Rotation) -> Self {
        Self {
            kind,
            x,
            y,
            rotation,
            shape: catalog::shape(kind, rotation),
        }
    }

    pub fn kind(&self) -> Tetromino {
        self.kind
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn shifted(&self, dx: i32, dy: i32) -> Piece {
        Piece {
            x: self.x + dx,
            y: self.y + dy,
            ..self.clone()
        }
    }

    pub fn rotated(&self, rotation: Rotation) -> Piece {
        Piece::new(self.kind, self.x, self.y, rotation)
    }

    /// Absolute board coordinates of the filled cells.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.shape.cells().map(move |(c, r)| (self.x + c, self.y + r))
    }

    /// False for pieces that arrived over the wire with a hand-edited shape.
    pub fn is_consistent(&self) -> bool {
        self.shape == catalog::shape(self.kind, self.rotation)
    }

    /// Horizontally inside the well and not below the floor.
    pub fn in_bounds(&self) -> bool {
        self.cells()
            .all(|(x, y)| x >= 0 && x < BOARD_WIDTH as i32 && y < BOARD_HEIGHT as i32)
    }
}

/// The current piece dropped as far as it legally goes.
pub fn derive_ghost(current: Option<&Piece>, board: &Board) -> Option<Piece> {
    let mut ghost = current?.clone();
    loop {
        let next = ghost.shifted(0, 1);
        if board.collides(&next) {
            return Some(ghost);
        }
        ghost = next;
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum RotationDir {
    Cw,
    Ccw,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LockOutcome {
    pub piece: Tetromino,
    pub lines_cleared: u32,
    /// Rows travelled by a hard drop; zero for gravity and soft-drop locks.
    pub drop_distance: u32,
    pub score_delta: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropResult {
    Moved,
    Locked(LockOutcome),
    /// No current piece, or the game is over.
    Idle,
}

#[derive(Clone)]
pub struct PieceEngine {
    board: Board,
    current: Option<Piece>,
    ghost: Option<Piece>,
    held: Option<Tetromino>,
    can_hold: bool,
    randomizer: Box<dyn Randomizer>,
    queue_len: usize,
    progress: Progress,
    game_over: bool,
}

impl PieceEngine {
    pub fn new(randomizer: Box<dyn Randomizer>, queue_len: usize) -> Self {
        Self {
            board: Board::new(),
            current: None,
            ghost: None,
            held: None,
            can_hold: true,
            randomizer,
            queue_len,
            progress: Progress::default(),
            game_over: false,
        }
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn current(&self) -> Option<&Piece> {
        self.current.as_ref()
    }

    pub fn ghost(&self) -> Option<&Piece> {
        self.ghost.as_ref()
    }

    pub fn held(&self) -> Option<Tetromino> {
        self.held
    }

    pub fn can_hold(&self) -> bool {
        self.can_hold
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn next_queue(&self) -> Vec<Tetromino> {
        self.randomizer.peek(self.queue_len)
    }

    pub fn cursor(&self) -> BagCursor {
        self.randomizer.cursor()
    }

    /// Pulls the next type and places it at its spawn offset. A blocked spawn
    /// ends the game and leaves no current piece. Returns whether a piece was
    /// created.
    pub fn spawn(&mut self) -> bool {
        if self.game_over || self.current.is_some() {
            return false;
        }
        let kind = self.randomizer.next();
        let spawned = self.place_new(kind);
        if spawned {
            self.can_hold = true;
        }
        spawned
    }

    fn place_new(&mut self, kind: Tetromino) -> bool {
        let piece = Piece::spawn(kind);
        if self.board.collides(&piece) {
            warn(&format!("top out: {:?} blocked at spawn", kind));
            self.current = None;
            self.game_over = true;
            self.refresh_ghost();
            return false;
        }
        self.current = Some(piece);
        self.refresh_ghost();
        true
    }

    fn refresh_ghost(&mut self) {
        self.ghost = derive_ghost(self.current.as_ref(), &self.board);
    }

    fn active(&self) -> Option<&Piece> {
        if self.game_over {
            return None;
        }
        self.current.as_ref()
    }

    pub fn move_by(&mut self, dx: i32, dy: i32) -> bool {
        let Some(piece) = self.active() else {
            return false;
        };
        let moved = piece.shifted(dx, dy);
        if self.board.collides(&moved) {
            return false;
        }
        self.current = Some(moved);
        self.refresh_ghost();
        true
    }

    pub fn move_left(&mut self) -> bool {
        self.move_by(-1, 0)
    }

    pub fn move_right(&mut self) -> bool {
        self.move_by(1, 0)
    }

    /// Tries the plain rotation, then each kick in table order. Nothing is
    /// applied unless some candidate fits.
    pub fn rotate(&mut self, dir: RotationDir) -> bool {
        let Some(piece) = self.active() else {
            return false;
        };
        let from = piece.rotation();
        let to = match dir {
            RotationDir::Cw => from.rotate_cw(),
            RotationDir::Ccw => from.rotate_ccw(),
        };
        let turned = piece.rotated(to);
        let candidate = std::iter::once((0, 0))
            .chain(KickTable::kicks(piece.kind(), from, to))
            .map(|(dx, dy)| turned.shifted(dx, dy))
            .find(|p| !self.board.collides(p));
        match candidate {
            Some(p) => {
                self.current = Some(p);
                self.refresh_ghost();
                true
            }
            None => false,
        }
    }

    pub fn rotate_cw(&mut self) -> bool {
        self.rotate(RotationDir::Cw)
    }

    pub fn rotate_ccw(&mut self) -> bool {
        self.rotate(RotationDir::Ccw)
    }

    /// One row down; locks in place when the row below is blocked.
    pub fn soft_drop(&mut self) -> DropResult {
        if self.active().is_none() {
            return DropResult::Idle;
        }
        if self.move_by(0, 1) {
            return DropResult::Moved;
        }
        match self.lock(None) {
            Some(outcome) => DropResult::Locked(outcome),
            None => DropResult::Idle,
        }
    }

    pub fn hard_drop(&mut self) -> Option<LockOutcome> {
        self.active()?;
        let mut distance = 0;
        while self.move_by(0, 1) {
            distance += 1;
        }
        self.lock(Some(distance))
    }

    /// Writes the piece, clears rows and scores. The next piece is not
    /// spawned here; the owner asks for it.
    pub fn lock(&mut self, hard_drop_distance: Option<u32>) -> Option<LockOutcome> {
        if self.game_over {
            return None;
        }
        let piece = self.current.take()?;
        self.board.place(&piece);
        let lines_cleared = self.board.clear_full_rows() as u32;
        let score_delta = self.progress.record_lock(lines_cleared, hard_drop_distance);
        self.ghost = None;
        Some(LockOutcome {
            piece: piece.kind(),
            lines_cleared,
            drop_distance: hard_drop_distance.unwrap_or(0),
            score_delta,
        })
    }

    /// Stashes the current type, or swaps it with the held one. Once per
    /// spawn.
    pub fn hold(&mut self) -> bool {
        if !self.can_hold {
            return false;
        }
        let Some(kind) = self.active().map(Piece::kind) else {
            return false;
        };
        self.current = None;
        let incoming = match self.held.replace(kind) {
            Some(swapped) => swapped,
            None => self.randomizer.next(),
        };
        self.place_new(incoming);
        self.can_hold = false;
        true
    }

    /// Ends the game if the current piece overlaps the stack. Returns the
    /// game-over flag.
    pub fn check_game_over(&mut self) -> bool {
        if !self.game_over {
            if let Some(piece) = &self.current {
                if self.board.collides(piece) {
                    warn("current piece overlaps the stack");
                    self.game_over = true;
                }
            }
        }
        self.game_over
    }

    #[cfg(test)]
    pub(crate) fn board_mut(&mut self) -> &mut Board {
        &mut self.board
    }

    #[cfg(test)]
    pub(crate) fn set_current(&mut self, piece: Piece) {
        self.current = Some(piece);
        self.refresh_ghost();
    }
}
