//! Grid geometry for panel placement.

use thiserror::Error;

/// A 0-based terminal coordinate, `x` is the column and `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub x: u16,
    pub y: u16,
}

impl Position {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

/// Errors raised while laying out panels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The grid needs at least one column.
    #[error("invalid layout: at least one column is required")]
    InvalidColumns,
    /// The terminal has no room left for another panel.
    #[error("window {id} is out of bounds: the terminal fits {capacity} panels")]
    OutOfBounds { id: usize, capacity: usize },
}

/// Top-left corner of the cell for `slot` in a row-major grid.
///
/// Slot `columns` lands exactly one cell height below slot `0`.
/// Coordinates saturate at `u16::MAX` rather than wrapping.
///
/// # Errors
/// Returns [`ConfigError::InvalidColumns`] when `columns` is zero.
pub fn place(
    slot: usize,
    cell_width: u16,
    cell_height: u16,
    columns: usize,
    origin_x: u16,
    origin_y: u16,
) -> Result<Position, ConfigError> {
    if columns == 0 {
        return Err(ConfigError::InvalidColumns);
    }

    let column = slot % columns;
    let row = slot / columns;
    let x = usize::from(cell_width)
        .saturating_mul(column)
        .saturating_add(usize::from(origin_x));
    let y = usize::from(cell_height)
        .saturating_mul(row)
        .saturating_add(usize::from(origin_y));

    Ok(Position {
        x: u16::try_from(x).unwrap_or(u16::MAX),
        y: u16::try_from(y).unwrap_or(u16::MAX),
    })
}

/// Clamp `value` into `0..dimension`. A zero dimension clips to 0.
pub fn clip(value: u16, dimension: u16) -> u16 {
    value.min(dimension.saturating_sub(1))
}
