//! BLE transports delivering raw advertisements.
//!
//! A [`Transport`] pushes every advertisement it hears into a tokio
//! channel. Filtering on the ATC service and decoding happen downstream,
//! so backends stay ignorant of the sensor format.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::advertisement::Advertisement;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for transport operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// Channel buffer size for advertisement events.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 256;

/// Boxed future returned by [`Transport`] methods.
pub type ScanFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ScanError>> + Send + 'a>>;

/// Source of BLE advertisements.
pub trait Transport: Send + Sync {
    /// Start scanning and return the stream of advertisements.
    fn start(&self, mode: ScanMode) -> ScanFuture<'_, mpsc::Receiver<Advertisement>>;

    /// Stop scanning. The receiver returned by `start` ends afterwards.
    fn stop(&self) -> ScanFuture<'_, ()>;
}

/// Scan type requested from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ScanMode {
    /// Send scan requests; also receives scan responses (local names)
    Active,
    /// Listen only; lower power, names may be missing
    #[default]
    Passive,
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanMode::Active => write!(f, "active"),
            ScanMode::Passive => write!(f, "passive"),
        }
    }
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

/// Create the transport for `backend`.
pub fn transport(backend: Backend) -> Box<dyn Transport> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => Box::new(bluer::BluerTransport::default()),
        #[cfg(feature = "hci")]
        Backend::Hci => Box::new(hci::HciTransport::new(0)),
    }
}
