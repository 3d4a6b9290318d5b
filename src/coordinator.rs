//! Round robin poller over all registered batteries.
//!
//! Only one battery is connected at a time. [`BatteryCoordinator::tick`] is
//! expected every couple of seconds from whatever drives the process; it
//! starts the next poll once the previous one is over. Notification payloads
//! are pushed in through [`BatteryCoordinator::on_fragment`]. Both take
//! `&mut self`, so callers that receive notifications on another thread have
//! to funnel them to the thread owning the coordinator (or wrap it in a
//! mutex).

use crate::battery::BatteryRecord;
use crate::error::{Error, FrameError, RingError};
use crate::hexdump;
use crate::protocol::{self, Telemetry, DEFAULT_CELL_COUNT, TERMINATOR_BYTE};
use crate::queue::PollingQueue;
use crate::ring::{ByteRing, DEFAULT_CAPACITY};
use crate::session::{ConnectionSession, Outcome, SessionState};
use crate::transport::{NotifyHandle, Transport};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_BATTERIES: usize = 10;

/// Sizing of the poller, fixed for the lifetime of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PollerConfig {
    pub max_batteries: usize,
    /// Cells per battery, the same for every registered pack.
    pub cell_count: usize,
    pub ring_capacity: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_batteries: DEFAULT_MAX_BATTERIES,
            cell_count: DEFAULT_CELL_COUNT,
            ring_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_batteries == 0 {
            return Err(Error::InvalidConfig("max_batteries must be at least 1"));
        }
        if self.cell_count == 0 {
            return Err(Error::InvalidConfig("cell_count must be at least 1"));
        }
        if self.ring_capacity == 0 {
            return Err(Error::InvalidConfig("ring_capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Result of feeding one fragment into a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assembly {
    /// Still waiting for the terminator.
    Pending,
    /// The terminator arrived; the ring holds the frame without it.
    Complete,
    /// The ring filled up before a terminator was seen.
    Overflow(RingError),
}

/// Append `bytes` one at a time, stopping at the first terminator.
///
/// The terminator itself is discarded, as is anything after it in the same
/// fragment.
pub fn append_fragment(ring: &mut ByteRing, bytes: &[u8]) -> Assembly {
    for byte in bytes {
        if *byte == TERMINATOR_BYTE {
            return Assembly::Complete;
        }
        if let Err(err) = ring.push(*byte) {
            return Assembly::Overflow(err);
        }
    }
    Assembly::Pending
}

/// What happened to a fragment handed to [`BatteryCoordinator::on_fragment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// No open session owns this handle.
    Stray,
    /// Buffered, the frame is not complete yet.
    Pending,
    /// A frame was decoded and stored for the battery at this index.
    Decoded(usize),
    /// A frame was complete but malformed; the old telemetry was kept.
    Rejected(usize, FrameError),
    /// The ring overflowed; the battery was requeued.
    Overflow(usize),
}

pub struct BatteryCoordinator<T: Transport> {
    transport: T,
    config: PollerConfig,
    batteries: Vec<BatteryRecord>,
    queue: PollingQueue,
    session: Option<ConnectionSession>,
}

impl<T: Transport> BatteryCoordinator<T> {
    pub fn new(transport: T, config: PollerConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            batteries: Vec::with_capacity(config.max_batteries),
            queue: PollingQueue::with_capacity(config.max_batteries),
            session: None,
        })
    }

    pub fn register_device(&mut self, identity: &str) -> Result<(), Error> {
        if self.batteries.len() == self.config.max_batteries {
            log::warn!(
                "Cannot add battery {identity}, maximum of {} reached",
                self.config.max_batteries
            );
            return Err(Error::RegistryFull {
                capacity: self.config.max_batteries,
            });
        }
        self.batteries
            .push(BatteryRecord::new(identity, self.config.ring_capacity));
        log::info!("Added LiFeBlue battery {identity}");
        Ok(())
    }

    /// Start polling the next battery unless one is still being polled.
    pub fn tick(&mut self) {
        if let Some(session) = &self.session {
            if self.transport.is_connected() {
                return;
            }
            log::warn!(
                "Lost connection to {} while waiting for a frame, requeuing",
                self.batteries[session.index()].identity()
            );
            self.abort_session();
        }

        if self.queue.is_empty() {
            log::info!("Queue empty, adding batteries back to be polled");
            self.queue.refill(self.batteries.len());
        }

        if let Some(index) = self.queue.pop() {
            self.start_session(index);
        }
    }

    fn start_session(&mut self, index: usize) {
        let record = &mut self.batteries[index];
        log::info!("Connecting to battery: {}", record.identity());
        record.ring.clear();

        let session = ConnectionSession::begin(&mut self.transport, index, record.identity());
        if session.is_awaiting_frame() {
            record.handle = session.handle();
            self.session = Some(session);
        } else {
            self.conclude(session);
        }
    }

    /// Route a notification payload to the battery subscribed under `handle`.
    pub fn on_fragment(&mut self, handle: NotifyHandle, bytes: &[u8]) -> FragmentOutcome {
        let Some(index) = self.active_index_for(handle) else {
            log::warn!(
                "Notification on {handle} without a matching battery, ignoring {} bytes",
                bytes.len()
            );
            return FragmentOutcome::Stray;
        };

        log::trace!("Fragment for #{index}: {bytes:02X?}");
        match append_fragment(&mut self.batteries[index].ring, bytes) {
            Assembly::Pending => FragmentOutcome::Pending,
            Assembly::Complete => self.complete_frame(index),
            Assembly::Overflow(err) => {
                log::warn!(
                    "Dropping frame from {}: {err}, requeuing",
                    self.batteries[index].identity()
                );
                self.abort_session();
                FragmentOutcome::Overflow(index)
            }
        }
    }

    fn active_index_for(&self, handle: NotifyHandle) -> Option<usize> {
        let index = self
            .batteries
            .iter()
            .position(|record| record.handle == Some(handle))?;
        self.session
            .as_ref()
            .filter(|session| session.index() == index && session.is_awaiting_frame())
            .map(|_| index)
    }

    fn complete_frame(&mut self, index: usize) -> FragmentOutcome {
        if let Some(mut session) = self.session.take() {
            session.close(&mut self.transport, Outcome::Success);
            self.session = Some(session);
        }

        let record = &mut self.batteries[index];
        log::trace!(
            "{}",
            hexdump::dump(record.identity(), &record.ring.to_vec())
        );
        let result = protocol::decode_frame(&mut record.ring, self.config.cell_count);

        if let Some(session) = self.session.take() {
            self.conclude(session);
        }

        let record = &mut self.batteries[index];
        match result {
            Ok(telemetry) => {
                log::info!(
                    "Battery {}: {}mV {}mA {}% SoC",
                    record.identity(),
                    telemetry.voltage_mv,
                    telemetry.current_ma,
                    telemetry.soc_percent
                );
                record.store(telemetry);
                FragmentOutcome::Decoded(index)
            }
            Err(err) => {
                log::warn!("Discarding frame from {}: {err}", record.identity());
                FragmentOutcome::Rejected(index, err)
            }
        }
    }

    fn abort_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close(&mut self.transport, Outcome::Requeue);
            self.conclude(session);
        }
    }

    /// `Closing -> Idle`: release the handle and clear the ring, requeue on failure.
    fn conclude(&mut self, session: ConnectionSession) {
        let index = session.index();
        let outcome = session.finish();
        let record = &mut self.batteries[index];
        record.handle = None;
        record.ring.clear();
        if outcome == Outcome::Requeue {
            self.queue.push(index);
        }
    }

    /// Drop every record and the queue, then register the same identities
    /// again with fresh rings. Telemetry and any open session are lost.
    pub fn reset(&mut self) {
        log::info!("Resetting batteries");
        if let Some(mut session) = self.session.take() {
            session.close(&mut self.transport, Outcome::Requeue);
            session.finish();
        }
        let ring_capacity = self.config.ring_capacity;
        self.batteries = self
            .batteries
            .iter()
            .map(|record| BatteryRecord::new(record.identity(), ring_capacity))
            .collect();
        self.queue.clear();
        log::info!("All done reset, {} batteries", self.batteries.len());
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn batteries(&self) -> &[BatteryRecord] {
        &self.batteries
    }

    pub fn battery(&self, index: usize) -> Option<&BatteryRecord> {
        self.batteries.get(index)
    }

    pub fn find(&self, identity: &str) -> Option<&BatteryRecord> {
        self.batteries
            .iter()
            .find(|record| record.identity() == identity)
    }

    /// Latest telemetry of the battery at `index`.
    pub fn telemetry(&self, index: usize) -> Option<&Telemetry> {
        self.battery(index).and_then(BatteryRecord::telemetry)
    }

    pub fn queue(&self) -> &PollingQueue {
        &self.queue
    }

    /// Index of the battery currently being polled.
    pub fn active(&self) -> Option<usize> {
        self.session.as_ref().map(ConnectionSession::index)
    }

    pub fn session_state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, ConnectionSession::state)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
