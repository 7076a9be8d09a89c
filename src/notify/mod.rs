//! Alert notifications.
//!
//! An [`AlertPolicy`](policy::AlertPolicy) turns readings into [`Alert`]s;
//! the [`NotificationDispatcher`] hands each alert to every configured
//! [`Notifier`]. Backends that can only deliver asynchronously report
//! `is_async() == true` and are awaited; the rest are called directly.

pub mod backends;
pub mod policy;

pub use backends::{LogNotifier, PrintNotifier, SystemNotifier, WebhookNotifier};
pub use policy::{AlertKind, AlertPolicy, AlertThresholds};

use std::future::Future;
use std::io;
use std::pin::Pin;
use thiserror::Error;

/// A message for a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Errors returned by notification backends.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification I/O failed: {0}")]
    Io(#[from] io::Error),
    /// The backend has no synchronous delivery path.
    #[error("{0} notifications can only be sent asynchronously")]
    AsyncOnly(&'static str),
    #[error("invalid webhook URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported webhook URL scheme '{0}' (only http is supported)")]
    UnsupportedScheme(String),
    #[error("webhook request failed: {0}")]
    Http(String),
    #[error("notification command failed: {0}")]
    Command(String),
    #[error("webhook URL is required for the webhook notifier")]
    MissingWebhookUrl,
}

/// Boxed future returned by [`Notifier::send_alert_async`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// A notification backend.
pub trait Notifier: Send + Sync {
    /// Short backend name used in log messages.
    fn name(&self) -> &'static str;

    /// Whether the dispatcher should use [`Notifier::send_alert_async`].
    fn is_async(&self) -> bool {
        false
    }

    fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError>;

    /// Defaults to the synchronous path.
    fn send_alert_async<'a>(&'a self, alert: &'a Alert) -> NotifyFuture<'a> {
        Box::pin(std::future::ready(self.send_alert(alert)))
    }
}

/// Available notification backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum NotifierKind {
    /// Write alerts to the application log
    Log,
    /// Print framed alerts to stderr
    Print,
    /// Desktop notification through `notify-send`
    System,
    /// POST alerts as JSON to a chat webhook (http only)
    Webhook,
}

/// Build the backend for `kind`.
///
/// # Errors
/// The webhook backend needs a valid `http://` URL.
pub fn build_notifier(kind: NotifierKind, webhook_url: Option<&str>) -> Result<Box<dyn Notifier>, NotifyError> {
    Ok(match kind {
        NotifierKind::Log => Box::new(LogNotifier),
        NotifierKind::Print => Box::new(PrintNotifier::new(io::stderr())),
        NotifierKind::System => Box::new(SystemNotifier::default()),
        NotifierKind::Webhook => {
            let url = webhook_url.ok_or(NotifyError::MissingWebhookUrl)?;
            Box::new(WebhookNotifier::new(url)?)
        }
    })
}

/// Fans alerts out to every configured backend.
#[derive(Default)]
pub struct NotificationDispatcher {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver `alert` to every backend and return how many succeeded.
    ///
    /// A failing backend is logged and does not stop the others.
    pub async fn dispatch(&self, alert: &Alert) -> usize {
        let mut delivered = 0;
        for notifier in &self.notifiers {
            let result = if notifier.is_async() {
                notifier.send_alert_async(alert).await
            } else {
                notifier.send_alert(alert)
            };
            match result {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!("{} notifier failed: {e}", notifier.name()),
            }
        }
        delivered
    }
}
