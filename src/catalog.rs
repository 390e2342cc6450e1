use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum Tetromino {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

impl Tetromino {
    /// Canonical bag order. Shuffles start from this order, so changing it
    /// changes every seeded sequence.
    pub fn all() -> [Tetromino; 7] {
        [
            Tetromino::I,
            Tetromino::O,
            Tetromino::T,
            Tetromino::S,
            Tetromino::Z,
            Tetromino::J,
            Tetromino::L,
        ]
    }

    /// Occupancy marker written into the board on lock. Never zero.
    pub fn color_id(self) -> u8 {
        match self {
            Tetromino::I => 1,
            Tetromino::J => 2,
            Tetromino::L => 3,
            Tetromino::O => 4,
            Tetromino::S => 5,
            Tetromino::Z => 6,
            Tetromino::T => 7,
        }
    }

    /// Top-left of the bounding box for rotation state 0.
    pub fn spawn_position(self) -> (i32, i32) {
        match self {
            // The I row sits on the second line of its 4x4 box.
            Tetromino::I => (3, -1),
            Tetromino::O => (4, 0),
            _ => (3, 0),
        }
    }

    fn box_size(self) -> usize {
        match self {
            Tetromino::I => 4,
            Tetromino::O => 2,
            _ => 3,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(into = "u8", try_from = "u8")]
pub enum Rotation {
    Spawn = 0,
    Right = 1,
    Reverse = 2,
    Left = 3,
}

impl Rotation {
    pub fn all() -> [Rotation; 4] {
        [
            Rotation::Spawn,
            Rotation::Right,
            Rotation::Reverse,
            Rotation::Left,
        ]
    }

    pub fn rotate_cw(self) -> Rotation {
        match self {
            Rotation::Spawn => Rotation::Right,
            Rotation::Right => Rotation::Reverse,
            Rotation::Reverse => Rotation::Left,
            Rotation::Left => Rotation::Spawn,
        }
    }

    pub fn rotate_ccw(self) -> Rotation {
        match self {
            Rotation::Spawn => Rotation::Left,
            Rotation::Left => Rotation::Reverse,
            Rotation::Reverse => Rotation::Right,
            Rotation::Right => Rotation::Spawn,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

impl From<Rotation> for u8 {
    fn from(r: Rotation) -> Self {
        r.index()
    }
}

impl TryFrom<u8> for Rotation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Rotation::Spawn),
            1 => Ok(Rotation::Right),
            2 => Ok(Rotation::Reverse),
            3 => Ok(Rotation::Left),
            other => Err(format!("rotation state out of range: {other}")),
        }
    }
}

/// Square occupancy grid for one (type, rotation) pair, row 0 on top.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Vec<u8>>", try_from = "Vec<Vec<u8>>")]
pub struct Shape {
    size: usize,
    rows: [[bool; 4]; 4],
}

impl Shape {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn filled(&self, col: usize, row: usize) -> bool {
        col < self.size && row < self.size && self.rows[row][col]
    }

    /// Filled cells as (col, row) offsets from the bounding box corner.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        (0..self.size).flat_map(move |row| {
            (0..self.size)
                .filter(move |&col| self.rows[row][col])
                .map(move |col| (col as i32, row as i32))
        })
    }

    fn rotated_cw(&self) -> Shape {
        let n = self.size;
        let mut rows = [[false; 4]; 4];
        for (row, line) in self.rows.iter().enumerate().take(n) {
            for (col, &cell) in line.iter().enumerate().take(n) {
                rows[col][n - 1 - row] = cell;
            }
        }
        Shape { size: n, rows }
    }
}

impl From<Shape> for Vec<Vec<u8>> {
    fn from(shape: Shape) -> Self {
        (0..shape.size)
            .map(|row| {
                (0..shape.size)
                    .map(|col| u8::from(shape.rows[row][col]))
                    .collect()
            })
            .collect()
    }
}

impl TryFrom<Vec<Vec<u8>>> for Shape {
    type Error = String;

    fn try_from(grid: Vec<Vec<u8>>) -> Result<Self, Self::Error> {
        let size = grid.len();
        if !(2..=4).contains(&size) {
            return Err(format!("shape must be 2x2 to 4x4, got {size} rows"));
        }
        let mut rows = [[false; 4]; 4];
        for (row, line) in grid.iter().enumerate() {
            if line.len() != size {
                return Err("shape grid must be square".to_string());
            }
            for (col, &cell) in line.iter().enumerate() {
                rows[row][col] = match cell {
                    0 => false,
                    1 => true,
                    other => return Err(format!("shape cell must be 0 or 1, got {other}")),
                };
            }
        }
        Ok(Shape { size, rows })
    }
}

fn spawn_shape(piece: Tetromino) -> Shape {
    let filled: &[(usize, usize)] = match piece {
        Tetromino::I => &[(0, 1), (1, 1), (2, 1), (3, 1)],
        Tetromino::O => &[(0, 0), (1, 0), (0, 1), (1, 1)],
        Tetromino::T => &[(1, 0), (0, 1), (1, 1), (2, 1)],
        Tetromino::S => &[(1, 0), (2, 0), (0, 1), (1, 1)],
        Tetromino::Z => &[(0, 0), (1, 0), (1, 1), (2, 1)],
        Tetromino::J => &[(0, 0), (0, 1), (1, 1), (2, 1)],
        Tetromino::L => &[(2, 0), (0, 1), (1, 1), (2, 1)],
    };
    let mut rows = [[false; 4]; 4];
    for &(col, row) in filled {
        rows[row][col] = true;
    }
    Shape {
        size: piece.box_size(),
        rows,
    }
}

/// SRS states are quarter turns of the spawn grid inside its bounding box.
pub fn shape(piece: Tetromino, rotation: Rotation) -> Shape {
    let mut grid = spawn_shape(piece);
    for _ in 0..rotation.index() {
        grid = grid.rotated_cw();
    }
    grid
}

#[derive(Default)]
pub struct KickTable;

impl KickTable {
    /// Offsets to try, in order, after the unkicked rotation collides.
    /// Returned in board coordinates (dy > 0 moves down).
    pub fn kicks(piece: Tetromino, from: Rotation, to: Rotation) -> Vec<(i32, i32)> {
        let idx = match (from, to) {
            (Rotation::Spawn, Rotation::Right) => 0,
            (Rotation::Right, Rotation::Spawn) => 1,
            (Rotation::Right, Rotation::Reverse) => 2,
            (Rotation::Reverse, Rotation::Right) => 3,
            (Rotation::Reverse, Rotation::Left) => 4,
            (Rotation::Left, Rotation::Reverse) => 5,
            (Rotation::Left, Rotation::Spawn) => 6,
            (Rotation::Spawn, Rotation::Left) => 7,
            _ => return Vec::new(),
        };
        // Guideline SRS tables, y up.
        const JLSTZ: [[(i32, i32); 4]; 8] = [
            [(-1, 0), (-1, 1), (0, -2), (-1, -2)], // 0->R
            [(1, 0), (1, -1), (0, 2), (1, 2)],     // R->0
            [(1, 0), (1, -1), (0, 2), (1, 2)],     // R->2
            [(-1, 0), (-1, 1), (0, -2), (-1, -2)], // 2->R
            [(1, 0), (1, 1), (0, -2), (1, -2)],    // 2->L
            [(-1, 0), (-1, -1), (0, 2), (-1, 2)],  // L->2
            [(-1, 0), (-1, -1), (0, 2), (-1, 2)],  // L->0
            [(1, 0), (1, 1), (0, -2), (1, -2)],    // 0->L
        ];
        const I: [[(i32, i32); 4]; 8] = [
            [(-2, 0), (1, 0), (-2, -1), (1, 2)], // 0->R
            [(2, 0), (-1, 0), (2, 1), (-1, -2)], // R->0
            [(-1, 0), (2, 0), (-1, 2), (2, -1)], // R->2
            [(1, 0), (-2, 0), (1, -2), (-2, 1)], // 2->R
            [(2, 0), (-1, 0), (2, 1), (-1, -2)], // 2->L
            [(-2, 0), (1, 0), (-2, -1), (1, 2)], // L->2
            [(1, 0), (-2, 0), (1, -2), (-2, 1)], // L->0
            [(-1, 0), (2, 0), (-1, 2), (2, -1)], // 0->L
        ];
        let table = match piece {
            Tetromino::O => return Vec::new(),
            Tetromino::I => &I,
            _ => &JLSTZ,
        };
        table[idx].iter().map(|&(dx, dy)| (dx, -dy)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(shape: Shape) -> Vec<(i32, i32)> {
        let mut cells: Vec<_> = shape.cells().collect();
        cells.sort();
        cells
    }

    #[test]
    fn every_state_has_four_cells() {
        for piece in Tetromino::all() {
            for rot in Rotation::all() {
                assert_eq!(shape(piece, rot).cells().count(), 4, "{piece:?} {rot:?}");
            }
        }
    }

    #[test]
    fn srs_states_match_reference() {
        // T pointing right: column 1 full plus the middle of column 2.
        assert_eq!(
            sorted(shape(Tetromino::T, Rotation::Right)),
            vec![(1, 0), (1, 1), (1, 2), (2, 1)]
        );
        // I vertical sits in the third column.
        assert_eq!(
            sorted(shape(Tetromino::I, Rotation::Right)),
            vec![(2, 0), (2, 1), (2, 2), (2, 3)]
        );
        assert_eq!(
            sorted(shape(Tetromino::O, Rotation::Left)),
            sorted(shape(Tetromino::O, Rotation::Spawn))
        );
    }

    #[test]
    fn srs_kicks_match_reference_jlstz_and_i() {
        let kicks_j = KickTable::kicks(Tetromino::J, Rotation::Spawn, Rotation::Right);
        assert_eq!(kicks_j, vec![(-1, 0), (-1, -1), (0, 2), (-1, 2)]);
        let kicks_i = KickTable::kicks(Tetromino::I, Rotation::Right, Rotation::Spawn);
        assert_eq!(kicks_i, vec![(2, 0), (-1, 0), (2, -1), (-1, 2)]);
        assert!(KickTable::kicks(Tetromino::O, Rotation::Spawn, Rotation::Right).is_empty());
        assert!(KickTable::kicks(Tetromino::T, Rotation::Spawn, Rotation::Reverse).is_empty());
    }

    #[test]
    fn every_kick_row_matches_srs() {
        use Rotation::*;
        let pairs = [
            (Spawn, Right),
            (Right, Spawn),
            (Right, Reverse),
            (Reverse, Right),
            (Reverse, Left),
            (Left, Reverse),
            (Left, Spawn),
            (Spawn, Left),
        ];
        // Board coordinates, dy > 0 is down.
        let jlstz = [
            [(-1, 0), (-1, -1), (0, 2), (-1, 2)],
            [(1, 0), (1, 1), (0, -2), (1, -2)],
            [(1, 0), (1, 1), (0, -2), (1, -2)],
            [(-1, 0), (-1, -1), (0, 2), (-1, 2)],
            [(1, 0), (1, -1), (0, 2), (1, 2)],
            [(-1, 0), (-1, 1), (0, -2), (-1, -2)],
            [(-1, 0), (-1, 1), (0, -2), (-1, -2)],
            [(1, 0), (1, -1), (0, 2), (1, 2)],
        ];
        let i = [
            [(-2, 0), (1, 0), (-2, 1), (1, -2)],
            [(2, 0), (-1, 0), (2, -1), (-1, 2)],
            [(-1, 0), (2, 0), (-1, -2), (2, 1)],
            [(1, 0), (-2, 0), (1, 2), (-2, -1)],
            [(2, 0), (-1, 0), (2, -1), (-1, 2)],
            [(-2, 0), (1, 0), (-2, 1), (1, -2)],
            [(1, 0), (-2, 0), (1, 2), (-2, -1)],
            [(-1, 0), (2, 0), (-1, -2), (2, 1)],
        ];
        for (k, &(from, to)) in pairs.iter().enumerate() {
            assert_eq!(KickTable::kicks(Tetromino::I, from, to), i[k].to_vec(), "I {from:?}->{to:?}");
            for piece in [Tetromino::J, Tetromino::L, Tetromino::S, Tetromino::T, Tetromino::Z] {
                assert_eq!(
                    KickTable::kicks(piece, from, to),
                    jlstz[k].to_vec(),
                    "{piece:?} {from:?}->{to:?}"
                );
            }
            assert!(KickTable::kicks(Tetromino::O, from, to).is_empty());
        }
    }

    #[test]
    fn shape_wire_form_rejects_garbage() {
        let json = serde_json::to_string(&shape(Tetromino::S, Rotation::Spawn)).unwrap();
        assert_eq!(json, "[[0,1,1],[1,1,0],[0,0,0]]");
        assert!(serde_json::from_str::<Shape>("[[1,1],[1]]").is_err());
        assert!(serde_json::from_str::<Shape>("[[2,0],[0,0]]").is_err());
        assert!(serde_json::from_str::<Rotation>("4").is_err());
    }
}
