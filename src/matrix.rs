//! Position matrix
//!
//! A fixed-size grid of concurrency slots. Each cell is simultaneously a
//! parallelism permit and a reserved screen region, so a session is never
//! admitted without a deterministic, non-overlapping place to put its window.

use tracing::debug;

/// Logical screen dimensions used to derive window placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self { width: 1920, height: 1080 }
    }
}

/// Window geometry derived from a matrix slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Device scale factor: 1.0 for a single row, 0.5 when sessions are
    /// stacked into a top/bottom split so they stay legible.
    pub scale: f64,
}

impl WindowRect {
    /// Full-screen rect at the origin, used by the sequential scheduler.
    pub fn fullscreen(screen: ScreenSize) -> Self {
        Self { x: 0, y: 0, width: screen.width, height: screen.height, scale: 1.0 }
    }
}

/// Grid of concurrency slots, one cell per admitted session.
///
/// Invariant: a profile name occupies at most one cell at any time
/// (`acquire` refuses a name that is already placed). The matrix is not
/// internally synchronized; the scheduler serializes access with a mutex
/// because slots are released from worker tasks.
#[derive(Debug)]
pub struct PositionMatrix {
    cells: Vec<Vec<Option<String>>>,
}

impl PositionMatrix {
    /// Size the grid from demand and capacity.
    ///
    /// One row when only one session can ever be visible, two rows
    /// otherwise. Columns cover the smaller of demand and capacity so the
    /// grid carries no permanently empty cells.
    pub fn new(number_of_profiles: usize, max_concurrent: usize) -> Self {
        let rows = if max_concurrent <= 1 || number_of_profiles <= 1 { 1 } else { 2 };
        let bound = number_of_profiles.min(max_concurrent).max(1);
        let cols = bound.div_ceil(rows);

        debug!("position matrix sized {}x{} for {} profiles / {} concurrent",
            rows, cols, number_of_profiles, max_concurrent);

        Self { cells: vec![vec![None; cols]; rows] }
    }

    pub fn rows(&self) -> usize {
        self.cells.len()
    }

    pub fn cols(&self) -> usize {
        self.cells[0].len()
    }

    /// Claim the first empty cell in row-major order. Returns `None` when
    /// the grid is full or the name is already placed.
    pub fn acquire(&mut self, name: &str) -> Option<(usize, usize)> {
        if self.position_of(name).is_some() {
            debug!("[{}] already holds a matrix slot", name);
            return None;
        }
        for row in 0..self.rows() {
            for col in 0..self.cols() {
                if self.cells[row][col].is_none() {
                    self.cells[row][col] = Some(name.to_string());
                    return Some((row, col));
                }
            }
        }
        None
    }

    /// Clear the cell holding `name`. Returns false if it held no cell.
    pub fn release(&mut self, name: &str) -> bool {
        if let Some((row, col)) = self.position_of(name) {
            self.cells[row][col] = None;
            return true;
        }
        false
    }

    fn position_of(&self, name: &str) -> Option<(usize, usize)> {
        for row in 0..self.rows() {
            for col in 0..self.cols() {
                if self.cells[row][col].as_deref() == Some(name) {
                    return Some((row, col));
                }
            }
        }
        None
    }

    /// Derive window geometry for a slot.
    ///
    /// When the grid would overflow two logical screen-widths, columns are
    /// compressed by dividing the width across `cols - 1` segments instead
    /// of `cols`, deliberately overlapping windows rather than letting them
    /// run off-screen.
    pub fn placement(&self, row: usize, col: usize, screen: ScreenSize) -> WindowRect {
        let cols = self.cols() as u32;
        let y = row as i32 * screen.height as i32;

        let x = if cols > 1 && (cols as u64 * screen.width as u64) > (2 * screen.width as u64) {
            col as i32 * (screen.width / (cols - 1)) as i32
        } else {
            col as i32 * screen.width as i32
        };

        let scale = if self.rows() == 1 { 1.0 } else { 0.5 };

        WindowRect { x, y, width: screen.width, height: screen.height, scale }
    }
}
