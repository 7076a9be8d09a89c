//! Notification backends.

use super::{Alert, Notifier, NotifyError, NotifyFuture};
use std::io::Write;
use std::process::{Command, ExitStatus};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

/// Upper bound for one webhook round trip.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Writes alerts to the application log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        log::info!("*** start notification ***");
        log::info!("title: {}", alert.title);
        log::info!("message: {}", alert.message);
        log::info!("*** end notification ***");
        Ok(())
    }
}

/// Prints a framed alert to a writer (stderr in the binary).
#[derive(Debug)]
pub struct PrintNotifier<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> PrintNotifier<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Notifier for PrintNotifier<W> {
    fn name(&self) -> &'static str {
        "print"
    }

    fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "\n*** START NOTIFICATION ***")?;
        writeln!(out, "Title: {}", alert.title)?;
        writeln!(out, "Message: {}", alert.message)?;
        writeln!(out, "*** END NOTIFICATION ***\n")?;
        out.flush()?;
        Ok(())
    }
}

/// Desktop notification through an external command (`notify-send`).
///
/// The dispatcher uses the async path, which waits on the child through
/// tokio instead of blocking the runtime thread.
#[derive(Debug, Clone)]
pub struct SystemNotifier {
    program: String,
}

impl Default for SystemNotifier {
    fn default() -> Self {
        Self::with_program("notify-send")
    }
}

impl SystemNotifier {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn check_exit(&self, status: ExitStatus) -> Result<(), NotifyError> {
        if status.success() {
            Ok(())
        } else {
            Err(NotifyError::Command(format!("{} exited with {status}", self.program)))
        }
    }
}

impl Notifier for SystemNotifier {
    fn name(&self) -> &'static str {
        "system"
    }

    fn is_async(&self) -> bool {
        true
    }

    fn send_alert(&self, alert: &Alert) -> Result<(), NotifyError> {
        let status = Command::new(&self.program)
            .arg(&alert.title)
            .arg(&alert.message)
            .status()?;
        self.check_exit(status)
    }

    fn send_alert_async<'a>(&'a self, alert: &'a Alert) -> NotifyFuture<'a> {
        Box::pin(async move {
            let status = tokio::process::Command::new(&self.program)
                .arg(&alert.title)
                .arg(&alert.message)
                .status()
                .await?;
            self.check_exit(status)
        })
    }
}

/// Posts `{"content": "<title>\n<message>"}` to an HTTP webhook.
///
/// Chat relays accept this body shape. Only plain `http://` endpoints are
/// supported, so TLS-only services need a local relay.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: Url,
}

impl WebhookNotifier {
    /// # Errors
    /// Fails on malformed URLs and on any scheme other than `http`.
    pub fn new(url: &str) -> Result<Self, NotifyError> {
        let url = Url::parse(url)?;
        if url.scheme() != "http" {
            return Err(NotifyError::UnsupportedScheme(url.scheme().to_string()));
        }
        if url.host_str().is_none() {
            return Err(NotifyError::InvalidUrl(url::ParseError::EmptyHost));
        }
        Ok(Self { url })
    }

    fn request(&self, alert: &Alert) -> Vec<u8> {
        let body = serde_json::json!({
            "content": format!("{}\n{}", alert.title, alert.message)
        })
        .to_string();
        let host = self.url.host_str().unwrap_or_default();
        let host = match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let target = match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        };

        format!(
            "POST {target} HTTP/1.1\r\nHost: {host}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    async fn post(&self, alert: &Alert) -> Result<(), NotifyError> {
        let host = self.url.host_str().unwrap_or_default();
        let port = self.url.port_or_known_default().unwrap_or(80);

        let mut stream = TcpStream::connect((host, port)).await?;
        stream.write_all(&self.request(alert)).await?;
        stream.shutdown().await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        check_status(&response)
    }
}

fn check_status(response: &[u8]) -> Result<(), NotifyError> {
    let response = String::from_utf8_lossy(response);
    let status_line = response.lines().next().unwrap_or_default();
    let code = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| NotifyError::Http(format!("malformed response: '{status_line}'")))?;

    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(NotifyError::Http(status_line.to_string()))
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn is_async(&self) -> bool {
        true
    }

    fn send_alert(&self, _alert: &Alert) -> Result<(), NotifyError> {
        Err(NotifyError::AsyncOnly("webhook"))
    }

    fn send_alert_async<'a>(&'a self, alert: &'a Alert) -> NotifyFuture<'a> {
        Box::pin(async move {
            tokio::time::timeout(WEBHOOK_TIMEOUT, self.post(alert))
                .await
                .map_err(|_| NotifyError::Http("timed out".to_string()))?
        })
    }
}
