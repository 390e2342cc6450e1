use serde::{Deserialize, Serialize};

use crate::engine::Piece;

pub const BOARD_WIDTH: usize = 10;
pub const BOARD_HEIGHT: usize = 20;

pub const EMPTY: u8 = 0;

/// Playfield grid, row 0 on top. A non-zero cell is occupied; the value is
/// an opaque marker with no meaning at this layer.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(transparent)]
pub struct Board {
    cells: [[u8; BOARD_WIDTH]; BOARD_HEIGHT],
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CellChange {
    pub x: u8,
    pub y: u8,
    pub value: u8,
}

impl Default for Board {
    fn default() -> Self {
        Self::new()
    }
}

impl Board {
    pub fn new() -> Self {
        Self {
            cells: [[EMPTY; BOARD_WIDTH]; BOARD_HEIGHT],
        }
    }

    pub fn rows(&self) -> &[[u8; BOARD_WIDTH]; BOARD_HEIGHT] {
        &self.cells
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u8> {
        self.cells.get(y).and_then(|row| row.get(x)).copied()
    }

    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        if x < BOARD_WIDTH && y < BOARD_HEIGHT {
            self.cells[y][x] = value;
        }
    }

    /// Walls and floor block; everything above row 0 is open so pieces can
    /// spawn partially off the top.
    pub fn is_occupied(&self, x: i32, y: i32) -> bool {
        if x < 0 || x >= BOARD_WIDTH as i32 {
            return true;
        }
        if y >= BOARD_HEIGHT as i32 {
            return true;
        }
        if y < 0 {
            return false;
        }
        self.cells[y as usize][x as usize] != EMPTY
    }

    pub fn collides(&self, piece: &Piece) -> bool {
        piece.cells().any(|(x, y)| self.is_occupied(x, y))
    }

    /// Writes the piece into the grid. Cells above the top edge are dropped.
    pub fn place(&mut self, piece: &Piece) {
        let marker = piece.kind().color_id();
        for (x, y) in piece.cells() {
            if y < 0 || x < 0 || x >= BOARD_WIDTH as i32 || y >= BOARD_HEIGHT as i32 {
                continue;
            }
            self.cells[y as usize][x as usize] = marker;
        }
    }

    /// Removes every full row, keeps the rest in order and pads the top with
    /// as many empty rows. Returns the number of rows removed.
    pub fn clear_full_rows(&mut self) -> usize {
        let kept: Vec<[u8; BOARD_WIDTH]> = self
            .cells
            .iter()
            .filter(|row| row.iter().any(|&c| c == EMPTY))
            .copied()
            .collect();
        let cleared = BOARD_HEIGHT - kept.len();
        if cleared == 0 {
            return 0;
        }
        let mut cells = [[EMPTY; BOARD_WIDTH]; BOARD_HEIGHT];
        cells[cleared..].copy_from_slice(&kept);
        self.cells = cells;
        cleared
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|row| row.iter().all(|&c| c == EMPTY))
    }

    /// Cells whose value differs in `other`, carrying `other`'s value.
    pub fn diff(&self, other: &Board) -> Vec<CellChange> {
        let mut changes = Vec::new();
        for (y, (mine, theirs)) in self.cells.iter().zip(other.cells.iter()).enumerate() {
            for (x, (&a, &b)) in mine.iter().zip(theirs.iter()).enumerate() {
                if a != b {
                    changes.push(CellChange {
                        x: x as u8,
                        y: y as u8,
                        value: b,
                    });
                }
            }
        }
        changes
    }

    /// Fails without touching the grid if any change is out of bounds.
    pub fn apply_changes(&mut self, changes: &[CellChange]) -> Result<(), String> {
        if let Some(bad) = changes
            .iter()
            .find(|c| c.x as usize >= BOARD_WIDTH || c.y as usize >= BOARD_HEIGHT)
        {
            return Err(format!("cell change out of bounds: ({}, {})", bad.x, bad.y));
        }
        for c in changes {
            self.cells[c.y as usize][c.x as usize] = c.value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Tetromino;

    fn fill_row(board: &mut Board, y: usize) {
        for x in 0..BOARD_WIDTH {
            board.set(x, y, 8);
        }
    }

    #[test]
    fn bounds_are_walls_floor_and_open_sky() {
        let board = Board::new();
        assert!(board.is_occupied(-1, 5));
        assert!(board.is_occupied(BOARD_WIDTH as i32, 5));
        assert!(board.is_occupied(3, BOARD_HEIGHT as i32));
        assert!(!board.is_occupied(3, -2));
        assert!(!board.is_occupied(3, 0));
    }

    #[test]
    fn place_drops_cells_above_the_top() {
        let mut board = Board::new();
        // I spawns with its filled row at y = 0; lift it one more row.
        let piece = Piece::spawn(Tetromino::I).shifted(0, -1);
        board.place(&piece);
        assert!(board.is_empty());

        let piece = Piece::spawn(Tetromino::I);
        board.place(&piece);
        assert_eq!(board.rows()[0][3..7], [1, 1, 1, 1]);
    }

    #[test]
    fn clear_full_rows_keeps_order_and_pads_top() {
        let mut board = Board::new();
        fill_row(&mut board, 19);
        board.set(0, 18, 5);
        fill_row(&mut board, 17);
        board.set(9, 16, 6);

        let cleared = board.clear_full_rows();
        assert_eq!(cleared, 2);
        assert_eq!(board.get(0, 19), Some(5));
        assert_eq!(board.get(9, 18), Some(6));
        assert!(board.rows()[..18].iter().all(|r| r.iter().all(|&c| c == EMPTY)));
    }

    #[test]
    fn diff_then_apply_reproduces_target() {
        let before = Board::new();
        let mut after = Board::new();
        after.set(2, 19, 3);
        after.set(7, 4, 1);
        let changes = before.diff(&after);
        assert_eq!(changes.len(), 2);

        let mut patched = before.clone();
        patched.apply_changes(&changes).unwrap();
        assert_eq!(patched, after);

        let bad = [CellChange { x: 10, y: 0, value: 1 }];
        assert!(patched.apply_changes(&bad).is_err());
        assert_eq!(patched, after);
    }
}
