//! Capabilities the poller needs from the wireless link.
//!
//! The shape follows a GATT client: connect to a peripheral, look up a
//! service, look up a characteristic on it and subscribe to notifications.
//! Notification payloads are not returned here; the transport owner feeds
//! them into [`BatteryCoordinator::on_fragment`](crate::coordinator::BatteryCoordinator::on_fragment)
//! together with the [`NotifyHandle`] returned by [`Characteristic::subscribe`].

use crate::error::TransportError;
use std::fmt;

/// Identifies the subscription a notification belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyHandle(pub u16);

impl fmt::Display for NotifyHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

pub trait Characteristic {
    fn can_notify(&self) -> bool;

    /// Start notifications. Fragments are delivered under the returned handle
    /// until the link is disconnected.
    fn subscribe(&mut self) -> Result<NotifyHandle, TransportError>;
}

pub trait Service {
    type Characteristic: Characteristic;

    fn characteristic(&self, uuid16: u16) -> Option<Self::Characteristic>;
}

/// A link that can talk to one peripheral at a time.
pub trait Transport {
    type Service: Service;

    /// An error may still leave the link up; `is_connected` must then report
    /// it so the caller can `disconnect`.
    fn connect(&mut self, identity: &str) -> Result<(), TransportError>;

    /// Best effort, never fails.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn service(&mut self, uuid16: u16) -> Option<Self::Service>;
}
