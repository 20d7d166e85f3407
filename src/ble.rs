//! # Bluetooth LE Transport
//!
//! Cat printers expose one GATT service with a write-without-response
//! characteristic for commands and a notify characteristic for status.
//!
//! ```text
//! advertised service  0xAF30
//! print service       0xAE30
//!   command (TX)      0xAE01  write without response
//!   status  (RX)      0xAE02  notify
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    bleuuid::uuid_from_u16, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use uuid::Uuid;

use crate::{
    error::Error,
    model::Model,
    transport::{Connector, FrameWriter, Link, NotificationStream},
};

pub const ADVERTISED_SERVICE: Uuid = uuid_from_u16(0xAF30);
pub const PRINT_SERVICE: Uuid = uuid_from_u16(0xAE30);
pub const COMMAND_CHARACTERISTIC: Uuid = uuid_from_u16(0xAE01);
pub const STATUS_CHARACTERISTIC: Uuid = uuid_from_u16(0xAE02);

/// How long to listen for advertisements before giving up.
pub const DEFAULT_SCAN_TIME: Duration = Duration::from_secs(3);

/// Largest single write; longer frames are split.
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Finds cat printers on the first Bluetooth adapter.
#[derive(Debug, Clone)]
pub struct BleConnector {
    scan_time: Duration,
    chunk_size: usize,
}

impl Default for BleConnector {
    fn default() -> Self {
        BleConnector {
            scan_time: DEFAULT_SCAN_TIME,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl BleConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_time(self, scan_time: Duration) -> Self {
        BleConnector { scan_time, ..self }
    }

    pub fn chunk_size(self, chunk_size: usize) -> Self {
        BleConnector {
            chunk_size: chunk_size.max(1),
            ..self
        }
    }

    /// List the names of printers in range.
    pub async fn scan(&self) -> Result<Vec<String>, Error> {
        let peripherals = self.discover().await?;
        Ok(peripherals.into_iter().map(|(_, name)| name).collect())
    }

    async fn discover(&self) -> Result<Vec<(Peripheral, String)>, Error> {
        let manager = Manager::new().await?;
        let central = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::DeviceNotFound("Bluetooth adapter".to_string()))?;

        info!("Scanning for {:?}...", self.scan_time);
        central
            .start_scan(ScanFilter {
                services: vec![ADVERTISED_SERVICE],
            })
            .await?;
        time::sleep(self.scan_time).await;

        let mut found = Vec::new();
        for peripheral in central.peripherals().await? {
            let name = match peripheral.properties().await {
                Ok(Some(props)) => props.local_name,
                Ok(None) => None,
                Err(err) => {
                    debug!("{:?}", err);
                    None
                }
            };
            if let Some(name) = name {
                debug!("Found {} at {}", name, peripheral.address());
                found.push((peripheral, name));
            }
        }
        if let Err(err) = central.stop_scan().await {
            debug!("Failed to stop scan: {:?}", err);
        }
        Ok(found)
    }
}

#[async_trait]
impl Connector for BleConnector {
    /// Connect to the first printer whose name starts with `device`.
    async fn connect(&self, device: &str) -> Result<Box<dyn Link>, Error> {
        let (peripheral, name) = self
            .discover()
            .await?
            .into_iter()
            .find(|(_, name)| name.starts_with(device))
            .ok_or_else(|| Error::DeviceNotFound(device.to_string()))?;

        info!("Connecting to {} at {}...", name, peripheral.address());
        peripheral.connect().await?;

        let model = Model::from_name(&name);
        if model.is_none() {
            warn!("{} is not a known model, assuming a 384 dot head", name);
        }
        Ok(Box::new(BleLink {
            peripheral,
            name,
            model,
            chunk_size: self.chunk_size,
            status: None,
            forwarder: None,
        }))
    }
}

pub struct BleLink {
    peripheral: Peripheral,
    name: String,
    model: Option<Model>,
    chunk_size: usize,
    status: Option<Characteristic>,
    forwarder: Option<JoinHandle<()>>,
}

impl BleLink {
    fn characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == PRINT_SERVICE && c.uuid == uuid)
    }
}

#[async_trait]
impl Link for BleLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn printable_width(&self) -> u32 {
        self.model.map_or(crate::PRINTER_WIDTH, |m| m.pins())
    }

    async fn resolve_channels(&mut self) -> Result<Arc<dyn FrameWriter>, Error> {
        self.peripheral.discover_services().await?;

        let command = self
            .characteristic(COMMAND_CHARACTERISTIC)
            .ok_or(Error::MissingChannel("command"))?;
        let status = self
            .characteristic(STATUS_CHARACTERISTIC)
            .ok_or(Error::MissingChannel("status"))?;
        self.status = Some(status);

        Ok(Arc::new(BleWriter {
            peripheral: self.peripheral.clone(),
            characteristic: command,
            chunk_size: self.chunk_size,
        }))
    }

    async fn subscribe(&mut self) -> Result<NotificationStream, Error> {
        let status = self.status.clone().ok_or(Error::MissingChannel("status"))?;

        // Take the stream before subscribing so no early frame is lost.
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&status).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != STATUS_CHARACTERISTIC {
                    continue;
                }
                if tx.send(notification.value).is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn unsubscribe(&mut self) -> Result<(), Error> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(status) = self.status.as_ref() {
            self.peripheral.unsubscribe(status).await?;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        info!("Disconnecting from {}...", self.name);
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

struct BleWriter {
    peripheral: Peripheral,
    characteristic: Characteristic,
    chunk_size: usize,
}

#[async_trait]
impl FrameWriter for BleWriter {
    async fn write(&self, frame: &[u8]) -> Result<(), Error> {
        for chunk in frame.chunks(self.chunk_size) {
            self.peripheral
                .write(&self.characteristic, chunk, WriteType::WithoutResponse)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
        }
        Ok(())
    }
}
