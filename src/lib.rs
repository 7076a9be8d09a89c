//! `atc-dashboard` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup, signal
//! handling and process exit codes. The core "business logic" lives in
//! [`crate::app`] where it can be tested deterministically with an injected
//! transport and an injected print sink.

pub mod advertisement;
pub mod alias;
pub mod app;
pub mod decoder;
pub mod mac_address;
pub mod notify;
pub mod registry;
pub mod render;
pub mod scanner;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{ATC_SERVICE_UUID, Advertisement};
pub use alias::{Alias, AliasMap, parse_alias, to_map};
pub use app::{Dashboard, EventOutcome, Options, RunError, RunSummary, run_with_io};
pub use decoder::{DecodeError, Reading, decode};
pub use mac_address::MacAddress;
pub use registry::{DeviceRegistry, DeviceState, SequenceUpdate, UpdateResult};
pub use render::{ConsoleSink, PrintSink, QueuedSink, WindowManager};
pub use scanner::{Backend, ScanError, ScanMode, Transport};
