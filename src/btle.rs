//! Provides a [`Transport`] backed by `btleplug`.
//!
//! `btleplug` is asynchronous while the poller is not, so the transport owns a
//! small Tokio runtime and blocks on it for every setup step. Notifications are
//! forwarded by a background task into a [`std::sync::mpsc`] channel; the
//! owner of the coordinator drains that channel and calls
//! [`BatteryCoordinator::on_fragment`](crate::coordinator::BatteryCoordinator::on_fragment)
//! from the same thread that calls `tick()`.
//!
//! # Example
//!
//! ```no_run
//! use lifeblue_lib::btle::BleTransport;
//! use lifeblue_lib::{BatteryCoordinator, PollerConfig};
//! use std::time::Duration;
//!
//! let (tx, rx) = std::sync::mpsc::channel();
//! let transport = BleTransport::new(tx, Duration::from_secs(5)).unwrap();
//! let mut coordinator = BatteryCoordinator::new(transport, PollerConfig::default()).unwrap();
//! coordinator.register_device("A4:C1:38:00:00:01").unwrap();
//! loop {
//!     coordinator.tick();
//!     while let Ok((handle, bytes)) = rx.recv_timeout(Duration::from_secs(2)) {
//!         coordinator.on_fragment(handle, &bytes);
//!     }
//! }
//! ```

use crate::error::TransportError;
use crate::protocol::SERVICE_UUID16;
use crate::transport::{self, NotifyHandle, Transport};
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{Central, CharPropFlags, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

/// A notification payload tagged with its subscription.
pub type Notification = (NotifyHandle, Vec<u8>);

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        TransportError::Bluetooth(err.to_string())
    }
}

/// A peripheral seen during a scan that advertises the battery service.
#[derive(Debug, Clone)]
pub struct DiscoveredBattery {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Everything a service or characteristic needs to talk to the peripheral.
#[derive(Clone)]
struct Link {
    runtime: Handle,
    peripheral: Peripheral,
    sender: mpsc::Sender<Notification>,
    next_handle: Arc<AtomicU16>,
    forwarder: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Link {
    fn stop_forwarder(&self) {
        let mut slot = self
            .forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

pub struct BleTransport {
    runtime: Runtime,
    adapter: Adapter,
    sender: mpsc::Sender<Notification>,
    next_handle: Arc<AtomicU16>,
    forwarder: Arc<Mutex<Option<JoinHandle<()>>>>,
    scan_timeout: Duration,
    link: Option<Link>,
}

impl BleTransport {
    /// Open the first Bluetooth adapter. Notifications of every future
    /// subscription are sent to `sender`.
    pub fn new(
        sender: mpsc::Sender<Notification>,
        scan_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .map_err(|err| TransportError::Bluetooth(format!("cannot start runtime: {err}")))?;

        let adapter = runtime.block_on(async {
            let manager = Manager::new().await?;
            manager
                .adapters()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| TransportError::Bluetooth("no adapter found".to_string()))
        })?;

        Ok(Self {
            runtime,
            adapter,
            sender,
            next_handle: Arc::new(AtomicU16::new(0)),
            forwarder: Arc::new(Mutex::new(None)),
            scan_timeout,
            link: None,
        })
    }

    /// Scan for `duration` and list peripherals advertising the battery service.
    pub fn scan(&self, duration: Duration) -> Result<Vec<DiscoveredBattery>, TransportError> {
        self.runtime.block_on(async {
            let service = uuid_from_u16(SERVICE_UUID16);
            log::info!("Starting BLE scan for {} seconds...", duration.as_secs());
            self.adapter
                .start_scan(ScanFilter {
                    services: vec![service],
                })
                .await?;
            tokio::time::sleep(duration).await;
            self.adapter.stop_scan().await?;

            let mut discovered = Vec::new();
            for peripheral in self.adapter.peripherals().await? {
                let Some(properties) = peripheral.properties().await? else {
                    continue;
                };
                if !properties.services.contains(&service) {
                    continue;
                }
                log::info!(
                    "Found LiFeBlue battery {} ({:?})",
                    properties.address,
                    properties.local_name
                );
                discovered.push(DiscoveredBattery {
                    address: properties.address.to_string(),
                    name: properties.local_name,
                    rssi: properties.rssi,
                });
            }
            log::info!("Scan complete. Found {} batteries", discovered.len());
            Ok::<_, TransportError>(discovered)
        })
    }

    async fn lookup(adapter: &Adapter, identity: &str) -> Result<Option<Peripheral>, TransportError> {
        for peripheral in adapter.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(identity) {
                return Ok(Some(peripheral));
            }
            if let Some(properties) = peripheral.properties().await? {
                if properties.local_name.as_deref() == Some(identity) {
                    return Ok(Some(peripheral));
                }
            }
        }
        Ok(None)
    }

    fn find_peripheral(&self, identity: &str) -> Result<Peripheral, TransportError> {
        let scan_timeout = self.scan_timeout;
        self.runtime.block_on(async {
            if let Some(peripheral) = Self::lookup(&self.adapter, identity).await? {
                return Ok(peripheral);
            }
            log::debug!("{identity} not seen yet, scanning for {scan_timeout:?}");
            self.adapter.start_scan(ScanFilter::default()).await?;
            tokio::time::sleep(scan_timeout).await;
            self.adapter.stop_scan().await?;
            Self::lookup(&self.adapter, identity)
                .await?
                .ok_or_else(|| TransportError::Connect {
                    identity: identity.to_string(),
                    reason: "device not found".to_string(),
                })
        })
    }
}

pub struct BleService {
    link: Link,
    service: btleplug::api::Service,
}

pub struct BleCharacteristic {
    link: Link,
    characteristic: btleplug::api::Characteristic,
}

impl Transport for BleTransport {
    type Service = BleService;

    fn connect(&mut self, identity: &str) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral(identity)?;
        let connect_error = |err: btleplug::Error| TransportError::Connect {
            identity: identity.to_string(),
            reason: err.to_string(),
        };
        self.runtime
            .block_on(peripheral.connect())
            .map_err(connect_error)?;

        // The link is up from here on; keep it so a failed discovery is torn
        // down by the regular disconnect path.
        self.link = Some(Link {
            runtime: self.runtime.handle().clone(),
            peripheral: peripheral.clone(),
            sender: self.sender.clone(),
            next_handle: self.next_handle.clone(),
            forwarder: self.forwarder.clone(),
        });
        self.runtime
            .block_on(peripheral.discover_services())
            .map_err(connect_error)
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.stop_forwarder();
            if let Err(err) = self.runtime.block_on(link.peripheral.disconnect()) {
                log::debug!("Ignoring disconnect failure: {err}");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| {
            self.runtime
                .block_on(link.peripheral.is_connected())
                .unwrap_or(false)
        })
    }

    fn service(&mut self, uuid16: u16) -> Option<BleService> {
        let link = self.link.as_ref()?;
        let uuid = uuid_from_u16(uuid16);
        link.peripheral
            .services()
            .into_iter()
            .find(|service| service.uuid == uuid)
            .map(|service| BleService {
                link: link.clone(),
                service,
            })
    }
}

impl transport::Service for BleService {
    type Characteristic = BleCharacteristic;

    fn characteristic(&self, uuid16: u16) -> Option<BleCharacteristic> {
        let uuid = uuid_from_u16(uuid16);
        self.service
            .characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .map(|characteristic| BleCharacteristic {
                link: self.link.clone(),
                characteristic: characteristic.clone(),
            })
    }
}

impl transport::Characteristic for BleCharacteristic {
    fn can_notify(&self) -> bool {
        self.characteristic
            .properties
            .contains(CharPropFlags::NOTIFY)
    }

    fn subscribe(&mut self) -> Result<NotifyHandle, TransportError> {
        let link = &self.link;
        let peripheral = link.peripheral.clone();
        let characteristic = self.characteristic.clone();
        let mut stream = link
            .runtime
            .block_on(async {
                peripheral.subscribe(&characteristic).await?;
                peripheral.notifications().await
            })
            .map_err(|err| TransportError::Subscribe(err.to_string()))?;

        let handle = NotifyHandle(link.next_handle.fetch_add(1, Ordering::Relaxed).wrapping_add(1));
        let sender = link.sender.clone();
        let uuid = characteristic.uuid;

        link.stop_forwarder();
        let task = link.runtime.spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                if sender.send((handle, notification.value)).is_err() {
                    break;
                }
            }
        });
        *link
            .forwarder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);

        Ok(handle)
    }
}
