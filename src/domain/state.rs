// Authoritative simulation state owned by the tick loop.

/// Board height in pellet rows.
pub const GRID_ROWS: usize = 31;
/// Board width in pellet columns; each row is stored as a bitmask.
pub const GRID_COLS: usize = 28;

const FULL_ROW: u32 = (1 << GRID_COLS) - 1;

/// Pellet occupancy, one `u32` bitmask per row (bit `c` set means column `c` holds a pellet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PelletGrid {
    rows: Vec<u32>,
}

impl PelletGrid {
    /// Grid with every cell holding a pellet.
    pub fn filled() -> Self {
        Self {
            rows: vec![FULL_ROW; GRID_ROWS],
        }
    }

    /// Grid with no pellets.
    pub fn empty() -> Self {
        Self {
            rows: vec![0; GRID_ROWS],
        }
    }

    pub fn has(&self, row: usize, col: usize) -> bool {
        col < GRID_COLS
            && self
                .rows
                .get(row)
                .is_some_and(|bits| bits & (1 << col) != 0)
    }

    /// Removes the pellet at (`row`, `col`); returns false if there was none.
    pub fn eat(&mut self, row: usize, col: usize) -> bool {
        if !self.has(row, col) {
            return false;
        }
        self.rows[row] &= !(1 << col);
        true
    }

    pub fn remaining(&self) -> u32 {
        self.rows.iter().map(|bits| bits.count_ones()).sum()
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }
}

impl Default for PelletGrid {
    fn default() -> Self {
        Self::filled()
    }
}

/// The single authoritative game snapshot.
///
/// Fields are private: the only mutation paths are the command methods
/// (`pause`/`play`), reached through the command interpreter, and `advance`,
/// called by the tick loop.
#[derive(Debug, Clone, Default)]
pub struct GameState {
    paused: bool,
    tick: u64,
    pellets: PelletGrid,
}

impl GameState {
    pub fn new(pellets: PelletGrid) -> Self {
        Self {
            paused: false,
            tick: 0,
            pellets,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn play(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Advances the simulation one tick. No-op while paused.
    pub fn advance(&mut self) -> bool {
        if self.paused {
            return false;
        }
        self.tick += 1;
        true
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn pellets(&self) -> &PelletGrid {
        &self.pellets
    }

    pub fn pellets_mut(&mut self) -> &mut PelletGrid {
        &mut self.pellets
    }
}
