//! Print sessions: one connection, one job, guaranteed teardown.

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::{
    bitmap::{self, TwoTonePixelBuffer},
    error::Error,
    protocol::{AckMode, Limits, Notifier, ProtocolClient, Timing},
    transport::{Connector, Link, NotificationStream},
};

/// Default print speed.
pub const DEFAULT_SPEED: u32 = 32;

/// Default heat energy.
pub const DEFAULT_ENERGY: u32 = 24_000;

/// Default rows fed after the last item so the strip clears the tear-off edge.
pub const DEFAULT_FINISH_FEED: u16 = 100;

/// Default wait before disconnecting, while the mechanism finishes moving.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(500);

/// Print settings for one device, built with chained setters.
#[derive(Debug, Clone)]
pub struct Config {
    device: String,
    speed: u32,
    energy: u32,
    finish_feed: u16,
    ack_mode: AckMode,
    timing: Timing,
    limits: Limits,
    cooldown: Duration,
}

impl Config {
    /// Initialize configuration data with default values.
    ///
    /// The device name is not modifiable after the initialization.
    ///
    /// # Example
    ///
    /// ```
    /// use kitty_print::{AckMode, Config};
    ///
    /// let config = Config::new("GB02".to_string())
    ///     .speed(24)
    ///     .energy(30_000)
    ///     .ack_mode(AckMode::Acknowledged);
    /// ```
    ///
    pub fn new(device: String) -> Config {
        Config {
            device,
            speed: DEFAULT_SPEED,
            energy: DEFAULT_ENERGY,
            finish_feed: DEFAULT_FINISH_FEED,
            ack_mode: AckMode::Unacknowledged,
            timing: Timing::default(),
            limits: Limits::default(),
            cooldown: DEFAULT_COOLDOWN,
        }
    }

    /// Load the persisted user settings from the environment.
    ///
    /// `KITTY_DEVICE` is required. `KITTY_SPEED`, `KITTY_ENERGY`,
    /// `KITTY_FINISH_FEED` and `KITTY_ACK_MODE` (`ack` / `none`) override
    /// the defaults when set.
    pub fn from_env() -> Result<Config, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, Error> {
        let device = lookup("KITTY_DEVICE")
            .ok_or_else(|| Error::InvalidConfig("KITTY_DEVICE is not set".to_string()))?;
        let mut config = Config::new(device);

        if let Some(speed) = lookup("KITTY_SPEED") {
            config.speed = parse_setting("KITTY_SPEED", &speed)?;
        }
        if let Some(energy) = lookup("KITTY_ENERGY") {
            config.energy = parse_setting("KITTY_ENERGY", &energy)?;
        }
        if let Some(feed) = lookup("KITTY_FINISH_FEED") {
            config.finish_feed = parse_setting("KITTY_FINISH_FEED", &feed)?;
        }
        if let Some(mode) = lookup("KITTY_ACK_MODE") {
            config.ack_mode = match mode.trim().to_lowercase().as_str() {
                "ack" | "acknowledged" => AckMode::Acknowledged,
                "none" | "unacknowledged" => AckMode::Unacknowledged,
                other => {
                    return Err(Error::InvalidConfig(format!(
                        "KITTY_ACK_MODE must be `ack` or `none`, got `{}`",
                        other
                    )))
                }
            };
        }
        Ok(config)
    }

    pub fn speed(self, speed: u32) -> Self {
        Config { speed, ..self }
    }

    pub fn energy(self, energy: u32) -> Self {
        Config { energy, ..self }
    }

    pub fn finish_feed(self, finish_feed: u16) -> Self {
        Config {
            finish_feed,
            ..self
        }
    }

    pub fn ack_mode(self, ack_mode: AckMode) -> Self {
        Config { ack_mode, ..self }
    }

    pub fn timing(self, timing: Timing) -> Self {
        Config { timing, ..self }
    }

    pub fn limits(self, limits: Limits) -> Self {
        Config { limits, ..self }
    }

    pub fn cooldown(self, cooldown: Duration) -> Self {
        Config { cooldown, ..self }
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} has invalid value `{}`", key, value)))
}

/// Ordered content items of one print job.
#[derive(Debug, Clone, Default)]
pub struct JobPlan {
    items: Vec<TwoTonePixelBuffer>,
}

impl JobPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: TwoTonePixelBuffer) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[TwoTonePixelBuffer] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<TwoTonePixelBuffer> for JobPlan {
    fn from_iter<I: IntoIterator<Item = TwoTonePixelBuffer>>(iter: I) -> Self {
        JobPlan {
            items: iter.into_iter().collect(),
        }
    }
}

/// What a finished job sent to the printer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    pub items: usize,
    pub rows_drawn: usize,
    pub rows_fed: usize,
}

/// The live link plus what has to be undone on release.
///
/// The link is handed to a spawned task for teardown, either by
/// [`Connection::release`] or on drop, so the print future being dropped
/// still unsubscribes and disconnects.
struct Connection {
    link: Option<Box<dyn Link>>,
    subscribed: bool,
    pump: Option<JoinHandle<()>>,
    cooldown: Duration,
}

impl Connection {
    fn new(link: Box<dyn Link>, cooldown: Duration) -> Self {
        Connection {
            link: Some(link),
            subscribed: false,
            pump: None,
            cooldown,
        }
    }

    fn link(&mut self) -> Result<&mut Box<dyn Link>, Error> {
        self.link
            .as_mut()
            .ok_or_else(|| Error::Transport("connection already released".to_string()))
    }

    /// Wait the cooldown, then tear the link down. Consumes the connection
    /// so it runs once.
    async fn release(mut self) {
        time::sleep(self.cooldown).await;
        if let Some(teardown) = self.detach(Duration::ZERO) {
            if let Err(err) = teardown.await {
                warn!("Teardown task failed: {}", err);
            }
        }
    }

    /// Stop the pump and move the link into a teardown task.
    fn detach(&mut self, cooldown: Duration) -> Option<JoinHandle<()>> {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let mut link = self.link.take()?;
        let subscribed = self.subscribed;

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("{}: no runtime left, dropping link", link.name());
                return None;
            }
        };
        Some(runtime.spawn(async move {
            if !cooldown.is_zero() {
                time::sleep(cooldown).await;
            }
            if subscribed {
                if let Err(err) = link.unsubscribe().await {
                    warn!("{}: failed to unsubscribe: {}", link.name(), err);
                }
            }
            match link.disconnect().await {
                Ok(()) => info!("Disconnected from {}", link.name()),
                Err(err) => warn!("{}: failed to disconnect: {}", link.name(), err),
            }
        }))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.link.is_some() {
            warn!("Print job dropped before teardown, releasing in the background");
            self.detach(self.cooldown);
        }
    }
}

/// Drives one [`JobPlan`] from connection to disconnection.
pub struct PrintSession {
    config: Config,
}

impl PrintSession {
    pub fn new(config: Config) -> Self {
        PrintSession { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Print `plan` on the configured device.
    pub async fn print(&self, connector: &dyn Connector, plan: JobPlan) -> Result<JobReport, Error> {
        self.print_with_cancel(connector, plan, CancellationToken::new())
            .await
    }

    /// Print `plan`, aborting when `cancel` fires.
    ///
    /// Whatever happens after the connection is up, the session waits the
    /// cooldown, unsubscribes and disconnects before returning.
    pub async fn print_with_cancel(
        &self,
        connector: &dyn Connector,
        plan: JobPlan,
        cancel: CancellationToken,
    ) -> Result<JobReport, Error> {
        if plan.is_empty() {
            info!("Nothing to print");
            return Ok(JobReport::default());
        }

        let link = cancellable(&cancel, connector.connect(&self.config.device)).await?;
        info!("Connected to {}", link.name());

        let mut connection = Connection::new(link, self.config.cooldown);
        let outcome = self.run(&mut connection, &plan, &cancel).await;
        if let Err(err) = &outcome {
            warn!("Print job failed ({:?}): {}", err.category(), err);
        }
        connection.release().await;
        outcome
    }

    async fn run(
        &self,
        connection: &mut Connection,
        plan: &JobPlan,
        cancel: &CancellationToken,
    ) -> Result<JobReport, Error> {
        let link = connection.link()?;
        let width = link.printable_width();

        let writer = cancellable(cancel, link.resolve_channels()).await?;
        let client = ProtocolClient::new(link.name(), writer, self.config.ack_mode)
            .timing(self.config.timing)
            .limits(self.config.limits.clone())
            .cancellation(cancel.clone());

        let stream = cancellable(cancel, link.subscribe()).await?;
        connection.subscribed = true;
        connection.pump = Some(spawn_pump(stream, client.notifier()));

        for item in plan.items() {
            if item.width() != width {
                return Err(Error::ShapeMismatch {
                    expected: width,
                    actual: item.width(),
                });
            }
        }

        client.prepare(self.config.speed, self.config.energy).await?;

        let mut report = JobReport::default();
        for (index, item) in plan.items().iter().enumerate() {
            let rows = bitmap::pack(item, width)?;
            debug!("Item {}: {} rows", index, rows.len());
            for row in &rows {
                if row.is_blank() {
                    client.feed(1).await?;
                    report.rows_fed += 1;
                } else {
                    client.draw_row(row).await?;
                    report.rows_drawn += 1;
                }
            }
            report.items += 1;
        }

        client.finish(self.config.finish_feed).await?;
        info!(
            "Printed {} items: {} rows drawn, {} rows fed",
            report.items, report.rows_drawn, report.rows_fed
        );
        Ok(report)
    }
}

/// Forward status frames to the client until the stream ends.
fn spawn_pump(mut stream: NotificationStream, notifier: Notifier) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = stream.recv().await {
            notifier.on_notify(&frame);
        }
        notifier.link_lost();
    })
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
