//! The step grid: 12 pitch rows × 16 or 32 steps.
//!
//! Row 0 is the highest pitch (B) and row 11 the lowest (C) of one
//! octave; columns run left to right in time. The same addressing is
//! used in persisted documents.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Number of pitch rows (one chromatic octave).
pub const ROWS: usize = 12;

/// Pitch-class names of the rows, highest first.
pub const ROW_NAMES: [&str; ROWS] = ["B", "A#", "A", "G#", "G", "F#", "F", "E", "D#", "D", "C#", "C"];

/// Allowed sequence lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepCount {
    #[default]
    Sixteen,
    ThirtyTwo,
}

impl StepCount {
    pub fn len(self) -> usize {
        match self {
            StepCount::Sixteen => 16,
            StepCount::ThirtyTwo => 32,
        }
    }

    /// The other length (16 ↔ 32).
    pub fn toggled(self) -> StepCount {
        match self {
            StepCount::Sixteen => StepCount::ThirtyTwo,
            StepCount::ThirtyTwo => StepCount::Sixteen,
        }
    }
}

impl TryFrom<usize> for StepCount {
    type Error = EngineError;

    fn try_from(n: usize) -> Result<Self, Self::Error> {
        match n {
            16 => Ok(StepCount::Sixteen),
            32 => Ok(StepCount::ThirtyTwo),
            _ => Err(EngineError::OutOfRange {
                what: "step count (16 or 32)".to_string(),
                value: n as f64,
            }),
        }
    }
}

/// MIDI note of `row` at `octave` (C4 = 60).
pub fn row_midi(octave: i32, row: usize) -> i32 {
    12 * (octave + 1) + 11 - row as i32
}

/// Transpose by `semitones`, clamped to the MIDI range.
pub fn transpose(midi: i32, semitones: i32) -> u8 {
    (midi + semitones).clamp(0, 127) as u8
}

/// Scientific pitch name of a MIDI note, e.g. 60 → "C4".
pub fn note_name(midi: u8) -> String {
    const NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = midi as i32 / 12 - 1;
    format!("{}{}", NAMES[midi as usize % 12], octave)
}

/// Boolean step pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<Vec<bool>>", from = "Vec<Vec<bool>>")]
pub struct Grid {
    cells: Vec<Vec<bool>>,
    steps: usize,
}

impl Default for Grid {
    fn default() -> Self {
        Grid::new(StepCount::Sixteen)
    }
}

impl Grid {
    pub fn new(steps: StepCount) -> Self {
        let n = steps.len();
        Grid {
            cells: vec![vec![false; n]; ROWS],
            steps: n,
        }
    }

    /// Build from persisted rows, normalizing to 12 rows × `steps`.
    /// Overlapping cells are kept; everything else is false.
    pub fn from_rows(rows: &[Vec<bool>], steps: StepCount) -> Self {
        let mut grid = Grid::new(steps);
        for (r, row) in rows.iter().take(ROWS).enumerate() {
            for (c, &on) in row.iter().take(grid.steps).enumerate() {
                grid.cells[r][c] = on;
            }
        }
        grid
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn step_count(&self) -> StepCount {
        if self.steps == 32 { StepCount::ThirtyTwo } else { StepCount::Sixteen }
    }

    pub fn get(&self, row: usize, step: usize) -> bool {
        self.cells
            .get(row)
            .and_then(|r| r.get(step))
            .copied()
            .unwrap_or(false)
    }

    pub fn set(&mut self, row: usize, step: usize, on: bool) -> Result<(), EngineError> {
        self.check(row, step)?;
        self.cells[row][step] = on;
        Ok(())
    }

    /// Flip one cell, returning its new value.
    pub fn toggle(&mut self, row: usize, step: usize) -> Result<bool, EngineError> {
        self.check(row, step)?;
        let cell = &mut self.cells[row][step];
        *cell = !*cell;
        Ok(*cell)
    }

    pub fn clear(&mut self) {
        for row in &mut self.cells {
            row.fill(false);
        }
    }

    /// Change the number of steps, keeping the overlapping columns and
    /// zero-filling new ones.
    pub fn resize(&mut self, steps: StepCount) {
        let n = steps.len();
        for row in &mut self.cells {
            row.resize(n, false);
        }
        self.steps = n;
    }

    /// Rows that are on at `step`, highest pitch first.
    pub fn active_rows(&self, step: usize) -> impl Iterator<Item = usize> + '_ {
        (0..ROWS).filter(move |&r| self.get(r, step))
    }

    pub fn rows(&self) -> &[Vec<bool>] {
        &self.cells
    }

    pub fn count_active(&self) -> usize {
        self.cells.iter().flatten().filter(|&&c| c).count()
    }

    fn check(&self, row: usize, step: usize) -> Result<(), EngineError> {
        if row >= ROWS {
            return Err(EngineError::OutOfRange {
                what: "grid row".to_string(),
                value: row as f64,
            });
        }
        if step >= self.steps {
            return Err(EngineError::OutOfRange {
                what: "grid step".to_string(),
                value: step as f64,
            });
        }
        Ok(())
    }
}

impl From<Grid> for Vec<Vec<bool>> {
    fn from(grid: Grid) -> Self {
        grid.cells
    }
}

impl From<Vec<Vec<bool>>> for Grid {
    fn from(rows: Vec<Vec<bool>>) -> Self {
        let widest = rows.iter().map(Vec::len).max().unwrap_or(16);
        let steps = if widest > 16 { StepCount::ThirtyTwo } else { StepCount::Sixteen };
        Grid::from_rows(&rows, steps)
    }
}
