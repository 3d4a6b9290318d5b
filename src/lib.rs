#![cfg_attr(docsrs, feature(doc_cfg))]
//! # lifeblue_lib
//!
//! This crate polls LiFeBlue lithium batteries over Bluetooth Low Energy and
//! decodes the telemetry frames they stream over their notify characteristic.
//!
//! The batteries are polled one at a time by a [`BatteryCoordinator`]: every
//! [`tick`](BatteryCoordinator::tick) it connects to the next battery in the
//! queue, subscribes to notifications and waits for the frame to arrive
//! through [`on_fragment`](BatteryCoordinator::on_fragment). The wireless link
//! itself is abstracted by the [`transport::Transport`] trait.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `lifeblue` command-line tool.
//! - `serde`: Enables `serde` support for the telemetry and configuration types.
//! - `btleplug`: Enables the Bluetooth transport and device scan based on the `btleplug` crate.
//! - `bin-dependencies`: Enables all features required by the `lifeblue` binary executable.

/// Fixed capacity byte ring used to assemble frames.
pub mod ring;
/// Frame layout and decoding of LiFeBlue telemetry.
pub mod protocol;
/// Per battery state.
pub mod battery;
/// Queue of batteries waiting to be polled.
pub mod queue;
/// Capabilities required from the wireless link.
pub mod transport;
/// A single poll attempt.
pub mod session;
/// The polling driver.
pub mod coordinator;
/// Hex dumps for trace logging.
pub mod hexdump;
/// Scripted transport for tests and dry runs.
pub mod mock;
/// Contains error types for the library.
mod error;

pub use battery::BatteryRecord;
pub use coordinator::{BatteryCoordinator, FragmentOutcome, PollerConfig};
pub use error::{DecodeError, Error, FrameError, FrameField, RingError, TransportError};
pub use protocol::{FlagSet, Telemetry};

/// Bluetooth transport based on `btleplug`.
#[cfg_attr(docsrs, doc(cfg(feature = "btleplug")))]
#[cfg(feature = "btleplug")]
pub mod btle;
