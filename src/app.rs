//! Core scan loop and dashboard (business logic) for `atc-dashboard`.
//!
//! This module is decoupled from CLI parsing, process exit codes and the
//! real terminal so it can be tested deterministically: the transport, the
//! window manager (and through it the print sink) and the shutdown signal
//! are all injected.

use crate::advertisement::Advertisement;
use crate::alias::{Alias, AliasMap};
use crate::decoder::decode;
use crate::mac_address::MacAddress;
use crate::notify::{
    AlertPolicy, AlertThresholds, NotificationDispatcher, NotifierKind, NotifyError, build_notifier,
};
use crate::registry::{DeviceRegistry, SequenceUpdate, UpdateResult, format_elapsed};
use crate::render::{ConfigError, LayoutConfig, Position, PrintSink, SinkError, WindowManager};
use crate::scanner::{Backend, ScanError, ScanMode, Transport};
use chrono::{DateTime, Local};
use clap::Parser;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

/// Width of a panel's label column.
const LABEL_WIDTH: usize = 12;
/// Width of the separator under the device name.
const SEPARATOR_WIDTH: usize = 20;
/// How long shutdown waits for alerts still being delivered.
pub const ALERT_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for the scan loop and dashboard.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// Scan mode; active scanning also picks up advertised names
    #[arg(long, default_value_t, value_enum)]
    pub mode: ScanMode,

    /// Specify human-readable alias for a sensor.
    /// Format: --alias A4:C1:38:00:99:5B=Kitchen
    #[arg(long = "alias", value_parser = crate::alias::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Verbose output, log malformed advertisements
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Panel width in terminal columns
    #[arg(long, default_value_t = 30)]
    pub panel_width: u16,

    /// Panel height in terminal rows
    #[arg(long, default_value_t = 10)]
    pub panel_height: u16,

    /// Horizontal gap between panels
    #[arg(long, default_value_t = 4)]
    pub gap_x: u16,

    /// Vertical gap between panels
    #[arg(long, default_value_t = 1)]
    pub gap_y: u16,

    /// Write to the terminal directly instead of through the print queue
    #[arg(long)]
    pub sync_output: bool,

    /// Do not prefix panel lines with their panel coordinates
    #[arg(long)]
    pub no_coordinates: bool,

    /// Alert when a sensor's battery drops below this percentage
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub alert_battery_below: Option<u8>,

    /// Alert when temperature rises above this value (°C)
    #[arg(long, allow_negative_numbers = true)]
    pub alert_temp_above: Option<f64>,

    /// Alert when temperature falls below this value (°C)
    #[arg(long, allow_negative_numbers = true)]
    pub alert_temp_below: Option<f64>,

    /// Alert when humidity rises above this value (%)
    #[arg(long)]
    pub alert_humidity_above: Option<f64>,

    /// Notification backend for alerts; repeat for several
    #[arg(long = "notifier", value_enum, default_value = "log")]
    pub notifiers: Vec<NotifierKind>,

    /// Target for the webhook notifier (http:// only)
    #[arg(long)]
    pub webhook_url: Option<String>,
}

impl Options {
    pub fn layout(&self) -> LayoutConfig {
        LayoutConfig {
            gap_x: self.gap_x,
            gap_y: self.gap_y,
            ..LayoutConfig::default()
        }
    }

    pub fn thresholds(&self) -> AlertThresholds {
        AlertThresholds {
            battery_below: self.alert_battery_below,
            temperature_above: self.alert_temp_above,
            temperature_below: self.alert_temp_below,
            humidity_above: self.alert_humidity_above,
        }
    }
}

/// Errors returned by the scan loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("invalid panel layout: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// What happened to one advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Not an ATC advertisement.
    Ignored,
    /// ATC service data that did not decode.
    Malformed,
    /// Same sequence counter as the last reading.
    Duplicate,
    /// New reading drawn into the device's panel.
    Rendered,
    /// New reading for a device that has no panel (terminal full).
    Unplaced,
}

/// Counters reported when the scan loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events: u64,
    pub rendered: u64,
    pub malformed: u64,
    pub devices: usize,
}

/// Format one `label value` panel line.
fn field(label: &str, value: impl std::fmt::Display) -> String {
    format!("{label:<LABEL_WIDTH$}{value:<8}")
}

/// The lines of a device panel, top to bottom.
pub fn panel_lines(name: &str, rssi: Option<i16>, update: &UpdateResult) -> Vec<String> {
    let reading = &update.reading;
    let rssi = rssi.map_or_else(|| "n/a".to_string(), |rssi| format!("{rssi} dB"));

    let mut lines = vec![
        field("device:", name),
        "-".repeat(SEPARATOR_WIDTH),
        field("temp:", format!("{:.2} °C", reading.temperature)),
        field("humidity:", format!("{:.2} %", reading.humidity)),
        field("batteryv:", format!("{} V", reading.battery_voltage)),
        field("battery:", format!("{} %", reading.battery_percent)),
        field("rssi:", rssi),
        field("count:", reading.sequence),
        field("time now:", &update.timestamp),
    ];
    if let Some(elapsed) = update.elapsed {
        lines.push(field("duration:", format_elapsed(elapsed)));
    }
    lines
}

/// Decoder, registry, panels and alerts wired together.
pub struct Dashboard {
    registry: DeviceRegistry,
    windows: WindowManager,
    aliases: AliasMap,
    panel_width: u16,
    panel_height: u16,
    policy: AlertPolicy,
    notifications: Arc<NotificationDispatcher>,
    pending_alerts: JoinSet<usize>,
}

impl Dashboard {
    pub fn new(windows: WindowManager, aliases: AliasMap, panel_width: u16, panel_height: u16) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            windows,
            aliases,
            panel_width,
            panel_height,
            policy: AlertPolicy::default(),
            notifications: Arc::new(NotificationDispatcher::default()),
            pending_alerts: JoinSet::new(),
        }
    }

    pub fn with_alerts(mut self, policy: AlertPolicy, notifications: NotificationDispatcher) -> Self {
        self.policy = policy;
        self.notifications = Arc::new(notifications);
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn windows(&self) -> &WindowManager {
        &self.windows
    }

    /// Fail early when not even one panel fits the terminal.
    pub fn check_layout(&self) -> Result<(), ConfigError> {
        let (columns, rows) = self.windows.grid_dimensions(self.panel_width, self.panel_height);
        if columns == 0 {
            return Err(ConfigError::InvalidColumns);
        }
        if rows == 0 {
            return Err(ConfigError::OutOfBounds { id: 0, capacity: 0 });
        }
        Ok(())
    }

    fn register(&mut self, advertisement: &Advertisement) -> Result<(), SinkError> {
        let address = advertisement.address;
        let first_device = self.registry.is_empty();
        let name = self
            .aliases
            .get(&address)
            .map(String::as_str)
            .or(advertisement.local_name.as_deref());
        let slot = self.registry.register_if_new(address, name);
        log::info!("new sensor {address} in slot {slot}");

        if first_device {
            self.windows.sink().clear_screen()?;
        }
        match self.windows.add_window(self.panel_width, self.panel_height, None) {
            Ok(id) => debug_assert_eq!(id, slot, "panel ids follow registration order"),
            Err(e) => log::warn!("no panel for {address}: {e}"),
        }
        Ok(())
    }

    fn render(&mut self, address: MacAddress, rssi: Option<i16>, update: &UpdateResult) -> Result<bool, SinkError> {
        let Some(state) = self.registry.get(&address) else {
            return Ok(false);
        };
        let Some(window) = self.windows.window_mut(state.slot) else {
            return Ok(false);
        };

        for (i, line) in panel_lines(&state.name, rssi, update).iter().enumerate() {
            window.print_line(line, (i == 0).then_some(Position::default()))?;
        }
        Ok(true)
    }

    /// Alerts still being delivered in the background.
    pub fn pending_alerts(&self) -> usize {
        self.pending_alerts.len()
    }

    /// Each alert is delivered on its own task so slow backends never hold
    /// up the scan loop.
    fn raise_alerts(&mut self, address: MacAddress, update: &UpdateResult) {
        while let Some(done) = self.pending_alerts.try_join_next() {
            if let Err(e) = done {
                log::warn!("alert task failed: {e}");
            }
        }
        if !self.policy.is_enabled() {
            return;
        }
        let name = self
            .registry
            .get(&address)
            .map(|state| state.name.clone())
            .unwrap_or_default();
        for alert in self.policy.evaluate(address, &name, &update.reading) {
            log::info!("{}: {}", alert.title, alert.message);
            let notifications = Arc::clone(&self.notifications);
            self.pending_alerts
                .spawn(async move { notifications.dispatch(&alert).await });
        }
    }

    /// Wait up to `grace` for background alerts, then abort the rest.
    pub async fn flush_alerts(&mut self, grace: Duration) {
        let drained = tokio::time::timeout(grace, async {
            while let Some(done) = self.pending_alerts.join_next().await {
                if let Err(e) = done {
                    log::warn!("alert task failed: {e}");
                }
            }
        })
        .await;
        if drained.is_err() {
            log::warn!("dropping {} undelivered alerts", self.pending_alerts.len());
            self.pending_alerts.shutdown().await;
        }
    }

    /// Run one advertisement through filter, decoder, registry and panels.
    ///
    /// Devices are registered on their first advertisement that decodes,
    /// so malformed packets never claim a panel. Alerts are only queued
    /// here; see [`Dashboard::flush_alerts`].
    pub fn handle_advertisement(
        &mut self,
        advertisement: &Advertisement,
        now: DateTime<Local>,
    ) -> Result<EventOutcome, SinkError> {
        let Some(payload) = advertisement.atc_payload() else {
            return Ok(EventOutcome::Ignored);
        };
        let reading = match decode(payload) {
            Ok(reading) => reading,
            Err(e) => {
                log::debug!("dropping advertisement from {}: {e}", advertisement.address);
                return Ok(EventOutcome::Malformed);
            }
        };

        let address = advertisement.address;
        if self.registry.get(&address).is_none() {
            self.register(advertisement)?;
        }

        let update = match self.registry.update_on_sequence_change(address, &reading, now) {
            SequenceUpdate::NoChange => return Ok(EventOutcome::Duplicate),
            SequenceUpdate::Updated(update) => update,
        };

        let rendered = self.render(address, advertisement.rssi, &update)?;
        self.raise_alerts(address, &update);
        Ok(if rendered {
            EventOutcome::Rendered
        } else {
            EventOutcome::Unplaced
        })
    }
}

/// Build the dashboard described by `options` on top of `windows`.
pub fn build_dashboard(options: &Options, mut windows: WindowManager) -> Result<Dashboard, RunError> {
    windows.set_show_coordinates(!options.no_coordinates);
    let aliases = crate::alias::to_map(&options.aliases);
    let policy = AlertPolicy::new(options.thresholds());
    let notifiers = if policy.is_enabled() {
        options
            .notifiers
            .iter()
            .map(|kind| build_notifier(*kind, options.webhook_url.as_deref()))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        Vec::new()
    };

    let dashboard = Dashboard::new(windows, aliases, options.panel_width, options.panel_height)
        .with_alerts(policy, NotificationDispatcher::new(notifiers));
    dashboard.check_layout()?;
    Ok(dashboard)
}

async fn scan(
    options: &Options,
    transport: &dyn Transport,
    dashboard: &mut Dashboard,
    shutdown: impl Future<Output = ()>,
) -> Result<RunSummary, RunError> {
    let sink = Arc::clone(dashboard.windows().sink());
    sink.clear_screen()?;
    sink.write(
        &format!(
            "Scanning BLE devices of type 'ATC_MiThermometer (PVVX)' in {} mode, please wait...",
            options.mode
        ),
        None,
    )?;

    let mut events = transport.start(options.mode).await?;
    let mut summary = RunSummary::default();
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                log::info!("stop requested");
                break Ok(());
            }
            event = events.recv() => {
                let Some(advertisement) = event else {
                    log::warn!("transport stopped delivering advertisements");
                    break Ok(());
                };
                summary.events += 1;
                match dashboard.handle_advertisement(&advertisement, Local::now()) {
                    Ok(EventOutcome::Rendered) => summary.rendered += 1,
                    Ok(EventOutcome::Malformed) => summary.malformed += 1,
                    Ok(_) => {}
                    Err(e) => break Err(e),
                }
            }
        }
    };

    // In-flight rendering has finished; stop the radio before reporting.
    let stopped = transport.stop().await;
    dashboard.flush_alerts(ALERT_FLUSH_TIMEOUT).await;
    if let Err(e) = result {
        if let Err(stop_error) = stopped {
            log::warn!("failed to stop transport: {stop_error}");
        }
        return Err(e.into());
    }
    stopped?;
    summary.devices = dashboard.registry().len();
    Ok(summary)
}

/// Run the scan loop until `shutdown` resolves or the transport ends.
///
/// The print sink behind `windows` is closed on every exit path, so queued
/// output is flushed even when the transport fails to start.
pub async fn run_with_io(
    options: Options,
    transport: &dyn Transport,
    windows: WindowManager,
    shutdown: impl Future<Output = ()>,
) -> Result<RunSummary, RunError> {
    let sink = Arc::clone(windows.sink());

    let result = match build_dashboard(&options, windows) {
        Ok(mut dashboard) => scan(&options, transport, &mut dashboard, shutdown).await,
        Err(e) => Err(e),
    };

    let closed = sink.close().await;
    let summary = result?;
    closed?;
    Ok(summary)
}
