//! Terminal rendering engine.
//!
//! The terminal is split into fixed-size panels laid out on a grid. Each
//! panel is a [`window::Window`] with its own clipped cursor, and every
//! positioned line ends up in a [`sink::PrintSink`] that owns the actual
//! terminal writes.

pub mod grid;
pub mod sink;
pub mod window;

pub use grid::{ConfigError, Position, clip, place};
pub use sink::{ConsoleSink, PrintSink, QueuedSink, SinkError};
pub use window::{LayoutConfig, Window, WindowManager};
