//! Panels with their own cursor, and the manager that lays them out.

use super::grid::{ConfigError, Position, clip, place};
use super::sink::{PrintSink, SinkError};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Terminal size assumed when it cannot be queried (e.g. output is piped).
pub const FALLBACK_TERMINAL_SIZE: (u16, u16) = (80, 24);

/// Where the panel grid starts and how far apart panels sit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutConfig {
    pub origin_x: u16,
    pub origin_y: u16,
    pub gap_x: u16,
    pub gap_y: u16,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            origin_x: 0,
            origin_y: 0,
            gap_x: 4,
            gap_y: 1,
        }
    }
}

/// A rectangular panel with a local cursor.
///
/// The cursor always stays inside `0..width` × `0..height`. Lines printed
/// past the bottom edge overwrite the last row; panels never scroll.
pub struct Window {
    id: usize,
    width: u16,
    height: u16,
    origin: Position,
    cursor: Position,
    line_height: u16,
    show_coordinates: bool,
    sink: Arc<dyn PrintSink>,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("origin", &self.origin)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Window {
    pub fn new(id: usize, width: u16, height: u16, origin: Position, sink: Arc<dyn PrintSink>) -> Self {
        Self {
            id,
            width,
            height,
            origin,
            cursor: Position::default(),
            line_height: 1,
            show_coordinates: true,
            sink,
        }
    }

    /// Toggle the `[x, y] ` prefix printed before every line.
    pub fn set_show_coordinates(&mut self, show: bool) {
        self.show_coordinates = show;
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn origin(&self) -> Position {
        self.origin
    }

    pub fn cursor(&self) -> Position {
        self.cursor
    }

    fn clip_position(&self, position: Position) -> Position {
        Position {
            x: clip(position.x, self.width),
            y: clip(position.y, self.height),
        }
    }

    /// Screen coordinates of the cursor.
    pub fn absolute_position(&self) -> Position {
        Position {
            x: self.origin.x.saturating_add(self.cursor.x),
            y: self.origin.y.saturating_add(self.cursor.y),
        }
    }

    fn line_feed(&mut self) {
        self.cursor = self.clip_position(Position {
            x: 0,
            y: self.cursor.y.saturating_add(self.line_height),
        });
    }

    /// Print `text` at the cursor, or at `position` (panel-local) when given,
    /// then move the cursor to the start of the next line.
    pub fn print_line(&mut self, text: &str, position: Option<Position>) -> Result<(), SinkError> {
        if let Some(position) = position {
            self.cursor = self.clip_position(position);
        }

        let absolute = self.absolute_position();
        let result = if self.show_coordinates {
            let text = format!("[{}, {}] {}", self.cursor.x, self.cursor.y, text);
            self.sink.write(&text, Some(absolute))
        } else {
            self.sink.write(text, Some(absolute))
        };

        self.line_feed();
        result
    }
}

/// Allocates panel ids and places panels on a grid sized to the terminal.
pub struct WindowManager {
    layout: LayoutConfig,
    terminal_cols: u16,
    terminal_rows: u16,
    show_coordinates: bool,
    sink: Arc<dyn PrintSink>,
    windows: BTreeMap<usize, Window>,
}

impl fmt::Debug for WindowManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowManager")
            .field("layout", &self.layout)
            .field("terminal_cols", &self.terminal_cols)
            .field("terminal_rows", &self.terminal_rows)
            .field("windows", &self.windows)
            .finish_non_exhaustive()
    }
}

impl WindowManager {
    /// Create a manager for the current terminal. The terminal size is
    /// queried once, here.
    pub fn new(layout: LayoutConfig, sink: Arc<dyn PrintSink>) -> Self {
        let (cols, rows) = crossterm::terminal::size().unwrap_or_else(|e| {
            log::warn!(
                "cannot query terminal size ({e}), assuming {}x{}",
                FALLBACK_TERMINAL_SIZE.0,
                FALLBACK_TERMINAL_SIZE.1
            );
            FALLBACK_TERMINAL_SIZE
        });
        log::info!("terminal size: {cols}x{rows}");
        Self::with_terminal_size(layout, sink, cols, rows)
    }

    pub fn with_terminal_size(layout: LayoutConfig, sink: Arc<dyn PrintSink>, cols: u16, rows: u16) -> Self {
        Self {
            layout,
            terminal_cols: cols,
            terminal_rows: rows,
            show_coordinates: true,
            sink,
            windows: BTreeMap::new(),
        }
    }

    /// Coordinate prefix setting applied to windows created afterwards.
    pub fn set_show_coordinates(&mut self, show: bool) {
        self.show_coordinates = show;
    }

    pub fn terminal_size(&self) -> (u16, u16) {
        (self.terminal_cols, self.terminal_rows)
    }

    /// The manager's default sink.
    pub fn sink(&self) -> &Arc<dyn PrintSink> {
        &self.sink
    }

    /// How many `width` × `height` panels fit across and down.
    pub fn grid_dimensions(&self, width: u16, height: u16) -> (usize, usize) {
        let cell_width = usize::from(width) + usize::from(self.layout.gap_x);
        let cell_height = usize::from(height) + usize::from(self.layout.gap_y);
        let free_cols = usize::from(self.terminal_cols.saturating_sub(self.layout.origin_x));
        let free_rows = usize::from(self.terminal_rows.saturating_sub(self.layout.origin_y));

        let columns = free_cols.checked_div(cell_width).unwrap_or(0);
        let rows = free_rows.checked_div(cell_height).unwrap_or(0);
        (columns, rows)
    }

    /// Create a panel and return its id (one past the highest id, or 0).
    ///
    /// Uses the manager's sink unless `sink` is given.
    ///
    /// # Errors
    /// [`ConfigError::InvalidColumns`] when not even one panel fits across
    /// the terminal, [`ConfigError::OutOfBounds`] when the grid is full.
    pub fn add_window(
        &mut self,
        width: u16,
        height: u16,
        sink: Option<Arc<dyn PrintSink>>,
    ) -> Result<usize, ConfigError> {
        let id = self.windows.keys().next_back().map_or(0, |last| last + 1);
        let (columns, rows) = self.grid_dimensions(width, height);
        if columns == 0 {
            return Err(ConfigError::InvalidColumns);
        }

        let capacity = columns * rows;
        if id >= capacity {
            return Err(ConfigError::OutOfBounds { id, capacity });
        }

        let origin = place(
            id,
            width.saturating_add(self.layout.gap_x),
            height.saturating_add(self.layout.gap_y),
            columns,
            self.layout.origin_x,
            self.layout.origin_y,
        )?;

        let sink = sink.unwrap_or_else(|| Arc::clone(&self.sink));
        let mut window = Window::new(id, width, height, origin, sink);
        window.set_show_coordinates(self.show_coordinates);
        log::debug!("window {id} at {},{} ({width}x{height})", origin.x, origin.y);
        self.windows.insert(id, window);
        Ok(id)
    }

    pub fn window(&self, id: usize) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn window_mut(&mut self, id: usize) -> Option<&mut Window> {
        self.windows.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::sink::ConsoleSink;
    use crate::test_utils::SharedBuffer;

    fn recording_sink() -> (SharedBuffer, Arc<dyn PrintSink>) {
        let buffer = SharedBuffer::default();
        let sink: Arc<dyn PrintSink> = Arc::new(ConsoleSink::new(buffer.clone()));
        (buffer, sink)
    }

    #[test]
    fn test_print_line_prefixes_local_coordinates() {
        let (buffer, sink) = recording_sink();
        let mut window = Window::new(0, 20, 5, Position::new(10, 2), sink);

        window.print_line("device:", None).unwrap();
        window.print_line("temp:", None).unwrap();

        assert_eq!(
            buffer.lines(),
            vec!["\x1b[3;11H[0, 0] device:", "\x1b[4;11H[0, 1] temp:"]
        );
        assert_eq!(window.cursor(), Position::new(0, 2));
    }

    #[test]
    fn test_print_line_without_coordinates() {
        let (buffer, sink) = recording_sink();
        let mut window = Window::new(0, 20, 5, Position::new(0, 0), sink);
        window.set_show_coordinates(false);

        window.print_line("plain", None).unwrap();
        assert_eq!(buffer.lines(), vec!["\x1b[1;1Hplain"]);
    }

    #[test]
    fn test_print_line_jumps_to_clipped_position() {
        let (buffer, sink) = recording_sink();
        let mut window = Window::new(0, 20, 5, Position::new(0, 0), sink);

        window.print_line("far", Some(Position::new(50, 50))).unwrap();
        assert_eq!(buffer.lines(), vec!["\x1b[5;20H[19, 4] far"]);
        assert_eq!(window.cursor(), Position::new(0, 4));
    }

    #[test]
    fn test_cursor_sticks_at_last_row() {
        let (buffer, sink) = recording_sink();
        let mut window = Window::new(0, 10, 3, Position::new(0, 0), sink);

        for i in 0..6 {
            window.print_line(&format!("line {i}"), None).unwrap();
            let cursor = window.cursor();
            assert!(cursor.x < window.width());
            assert!(cursor.y < window.height());
        }

        let lines = buffer.lines();
        assert_eq!(lines[2], "\x1b[3;1H[0, 2] line 2");
        assert_eq!(lines[5], "\x1b[3;1H[0, 2] line 5");
    }

    #[test]
    fn test_print_line_returns_to_top() {
        let (_buffer, sink) = recording_sink();
        let mut window = Window::new(0, 10, 3, Position::new(0, 0), sink);
        window.print_line("a", None).unwrap();
        window.print_line("b", Some(Position::new(0, 0))).unwrap();
        assert_eq!(window.cursor(), Position::new(0, 1));
    }

    #[test]
    fn test_add_window_assigns_increasing_ids() {
        let (_buffer, sink) = recording_sink();
        let mut manager = WindowManager::with_terminal_size(LayoutConfig::default(), sink, 120, 40);

        assert_eq!(manager.add_window(26, 10, None), Ok(0));
        assert_eq!(manager.add_window(26, 10, None), Ok(1));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_window_lays_out_row_major() {
        let (_buffer, sink) = recording_sink();
        let layout = LayoutConfig {
            origin_x: 1,
            origin_y: 1,
            gap_x: 4,
            gap_y: 1,
        };
        let mut manager = WindowManager::with_terminal_size(layout, sink, 120, 40);
        // (120 - 1) / 30 = 3 columns, (40 - 1) / 11 = 3 rows
        assert_eq!(manager.grid_dimensions(26, 10), (3, 3));

        for _ in 0..4 {
            manager.add_window(26, 10, None).unwrap();
        }
        assert_eq!(manager.window(0).unwrap().origin(), Position::new(1, 1));
        assert_eq!(manager.window(2).unwrap().origin(), Position::new(61, 1));
        assert_eq!(manager.window(3).unwrap().origin(), Position::new(1, 12));
    }

    #[test]
    fn test_add_window_out_of_bounds() {
        let (_buffer, sink) = recording_sink();
        let mut manager = WindowManager::with_terminal_size(LayoutConfig::default(), sink, 60, 22);
        // 60 / 30 = 2 columns, 22 / 11 = 2 rows
        for expected in 0..4 {
            assert_eq!(manager.add_window(26, 10, None), Ok(expected));
        }
        assert_eq!(
            manager.add_window(26, 10, None),
            Err(ConfigError::OutOfBounds { id: 4, capacity: 4 })
        );
    }

    #[test]
    fn test_add_window_too_wide_for_terminal() {
        let (_buffer, sink) = recording_sink();
        let mut manager = WindowManager::with_terminal_size(LayoutConfig::default(), sink, 20, 40);
        assert_eq!(manager.add_window(26, 10, None), Err(ConfigError::InvalidColumns));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_add_window_uses_explicit_sink() {
        let (default_buffer, default_sink) = recording_sink();
        let (own_buffer, own_sink) = recording_sink();
        let mut manager = WindowManager::with_terminal_size(LayoutConfig::default(), default_sink, 120, 40);

        let id = manager.add_window(26, 10, Some(own_sink)).unwrap();
        manager.window_mut(id).unwrap().print_line("hello", None).unwrap();

        assert!(default_buffer.contents().is_empty());
        assert_eq!(own_buffer.lines(), vec!["\x1b[1;1H[0, 0] hello"]);
    }

    #[test]
    fn test_manager_coordinate_setting_applies_to_new_windows() {
        let (buffer, sink) = recording_sink();
        let mut manager = WindowManager::with_terminal_size(LayoutConfig::default(), sink, 120, 40);
        manager.set_show_coordinates(false);

        let id = manager.add_window(26, 10, None).unwrap();
        manager.window_mut(id).unwrap().print_line("hello", None).unwrap();
        assert_eq!(buffer.lines(), vec!["\x1b[1;1Hhello"]);
    }
}
