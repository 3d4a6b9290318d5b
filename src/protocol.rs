//! LiFeBlue telemetry frame layout and decoder.
//!
//! The battery streams its state as ASCII hex text over the notify
//! characteristic. Multi-byte values are sent least significant byte first,
//! so `"58920100"` reads as `0x58920100` and has to be swapped into
//! `0x00019258` (103000 mAh).
//!
//! ```text
//! voltage(8) current(8) amp_hours(8) cycles(4) soc(4) temp(4) status(4) afe(4) [cell(4)] x N  0x87
//! ```
//!
//! The frame is followed by a checksum which is not consumed here.

use crate::error::{DecodeError, FrameError, FrameField};
use crate::ring::ByteRing;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Raw byte marking the end of a frame. Not hex encoded.
pub const TERMINATOR_BYTE: u8 = 0x87;

/// 16-bit short form of the battery's GATT service UUID.
pub const SERVICE_UUID16: u16 = 0xffe0;
/// 16-bit short form of the notify characteristic UUID.
pub const CHARACTERISTIC_UUID16: u16 = 0xffe4;

/// The battery reports tenths of Kelvin, offset by 273.1 °C.
pub const TEMPERATURE_OFFSET: i32 = 2731;

pub const DEFAULT_CELL_COUNT: usize = 4;

// Bit assignments of the `status` word
pub const CELL_HIGH_VOLTAGE: u16 = 0x80;
pub const CELL_LOW_VOLTAGE: u16 = 0x40;
pub const OVER_CURRENT_WHEN_CHARGE: u16 = 0x20;
pub const OVER_CURRENT_WHEN_DISCHARGE: u16 = 0x10;
pub const LOW_TEMP_WHEN_DISCHARGE: u16 = 0x08;
pub const LOW_TEMP_WHEN_CHARGE: u16 = 0x04;
pub const HIGH_TEMP_WHEN_DISCHARGE: u16 = 0x02;
pub const HIGH_TEMP_WHEN_CHARGE: u16 = 0x01;
// Bit assignment of the `afe_status` word, per data sheet
pub const SHORT_CIRCUITED: u16 = 0x20;

const SHORT_FIELD: usize = 4;
const LONG_FIELD: usize = 8;

macro_rules! read_flag {
    ($mask:expr,$bit:expr) => {
        ($mask & $bit) != 0
    };
}

fn hex_value(byte: u8) -> Result<u32, DecodeError> {
    match byte {
        b'0'..=b'9' => Ok((byte - b'0') as u32),
        b'a'..=b'f' => Ok((byte - b'a' + 10) as u32),
        b'A'..=b'F' => Ok((byte - b'A' + 10) as u32),
        _ => Err(DecodeError::InvalidHexDigit(byte)),
    }
}

/// Consume one `width` character field from the front of `ring`.
///
/// The bytes are consumed even if they turn out not to be valid hex. When the
/// ring holds fewer than `width` bytes everything left is consumed and
/// [`DecodeError::Truncated`] is returned.
pub fn decode_field(ring: &mut ByteRing, width: usize) -> Result<u32, DecodeError> {
    if width != SHORT_FIELD && width != LONG_FIELD {
        return Err(DecodeError::InvalidWidth(width));
    }

    let mut buf = [0u8; LONG_FIELD];
    let mut available = 0;
    while available < width {
        match ring.pop_front() {
            Ok(byte) => {
                buf[available] = byte;
                available += 1;
            }
            Err(_) => break,
        }
    }
    if available < width {
        return Err(DecodeError::Truncated {
            expected: width,
            available,
        });
    }

    let mut value: u32 = 0;
    for byte in &buf[..width] {
        value = (value << 4) | hex_value(*byte)?;
    }

    Ok(match width {
        SHORT_FIELD => (value as u16).swap_bytes() as u32,
        _ => value.swap_bytes(),
    })
}

fn read_field(ring: &mut ByteRing, width: usize, field: FrameField) -> Result<u32, FrameError> {
    decode_field(ring, width).map_err(|source| {
        log::warn!("Cannot decode {field} field: {source}");
        FrameError { field, source }
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FlagSet {
    pub cell_high_voltage: bool,
    pub cell_low_voltage: bool,
    pub over_current_when_charge: bool,
    pub over_current_when_discharge: bool,
    pub low_temp_when_discharge: bool,
    pub low_temp_when_charge: bool,
    pub high_temp_when_discharge: bool,
    pub high_temp_when_charge: bool,
    pub short_circuited: bool,
}

impl FlagSet {
    /// True when any protection flag is raised.
    pub fn any(&self) -> bool {
        self.iter().any(|(_, set)| set)
    }

    /// Flags paired with a human readable name, in data sheet order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, bool)> {
        [
            ("Cell High Voltage", self.cell_high_voltage),
            ("Cell Low Voltage", self.cell_low_voltage),
            ("Over Current When Charge", self.over_current_when_charge),
            ("Over Current When Discharge", self.over_current_when_discharge),
            ("Low Temp When Charge", self.low_temp_when_charge),
            ("Low Temp When Discharge", self.low_temp_when_discharge),
            ("High Temp When Charge", self.high_temp_when_charge),
            ("High Temp When Discharge", self.high_temp_when_discharge),
            ("Is Short Circuited", self.short_circuited),
        ]
        .into_iter()
    }
}

/// Project the two status words onto named flags.
pub fn decode_flags(status: u16, afe_status: u16) -> FlagSet {
    FlagSet {
        cell_high_voltage: read_flag!(status, CELL_HIGH_VOLTAGE),
        cell_low_voltage: read_flag!(status, CELL_LOW_VOLTAGE),
        over_current_when_charge: read_flag!(status, OVER_CURRENT_WHEN_CHARGE),
        over_current_when_discharge: read_flag!(status, OVER_CURRENT_WHEN_DISCHARGE),
        low_temp_when_discharge: read_flag!(status, LOW_TEMP_WHEN_DISCHARGE),
        low_temp_when_charge: read_flag!(status, LOW_TEMP_WHEN_CHARGE),
        high_temp_when_discharge: read_flag!(status, HIGH_TEMP_WHEN_DISCHARGE),
        high_temp_when_charge: read_flag!(status, HIGH_TEMP_WHEN_CHARGE),
        short_circuited: read_flag!(afe_status, SHORT_CIRCUITED),
    }
}

/// One decoded telemetry frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Telemetry {
    pub voltage_mv: u32,
    pub current_ma: i32, // negative=charging
    pub amp_hours_mah: u32,
    pub cycle_count: u16,
    pub soc_percent: u16,
    /// Tenths of a degree Celsius.
    pub temperature_dc: i16,
    pub status: u16,
    pub afe_status: u16,
    pub cells_mv: Vec<u16>,
    pub flags: FlagSet,
}

impl Telemetry {
    pub fn voltage_v(&self) -> f32 {
        self.voltage_mv as f32 / 1000.0
    }

    pub fn current_a(&self) -> f32 {
        self.current_ma as f32 / 1000.0
    }

    pub fn amp_hours_ah(&self) -> f32 {
        self.amp_hours_mah as f32 / 1000.0
    }

    pub fn temperature_c(&self) -> f32 {
        self.temperature_dc as f32 / 10.0
    }

    pub fn temperature_f(&self) -> f32 {
        self.temperature_c() * 1.8 + 32.0
    }
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Voltage: {:.2}V", self.voltage_v())?;
        writeln!(f, "Current: {:.2}A", self.current_a())?;
        writeln!(f, "Amp Hrs: {:.2}Ah", self.amp_hours_ah())?;
        writeln!(f, "Cycles: {}", self.cycle_count)?;
        writeln!(f, "SoC: {}%", self.soc_percent)?;
        writeln!(
            f,
            "Temp: {:.1} (C) {:.2} (F)",
            self.temperature_c(),
            self.temperature_f()
        )?;
        let cells: Vec<String> = self.cells_mv.iter().map(|mv| format!("{mv} (mV)")).collect();
        writeln!(f, "Cells: {}", cells.join(" "))?;
        for (name, set) in self.flags.iter() {
            writeln!(f, "{name}: {}", if set { "X" } else { "-" })?;
        }
        Ok(())
    }
}

/// Decode a whole frame from the front of `ring`.
///
/// The terminator must already be removed. On failure the ring is left as
/// is, with the bytes of the broken field (and all before it) consumed.
pub fn decode_frame(ring: &mut ByteRing, cell_count: usize) -> Result<Telemetry, FrameError> {
    let voltage_mv = read_field(ring, LONG_FIELD, FrameField::Voltage)?;
    let current_ma = read_field(ring, LONG_FIELD, FrameField::Current)? as i32;
    let amp_hours_mah = read_field(ring, LONG_FIELD, FrameField::AmpHours)?;
    let cycle_count = read_field(ring, SHORT_FIELD, FrameField::CycleCount)? as u16;
    let soc_percent = read_field(ring, SHORT_FIELD, FrameField::StateOfCharge)? as u16;
    let raw_temperature = read_field(ring, SHORT_FIELD, FrameField::Temperature)?;
    let temperature_dc = i16::try_from(raw_temperature as i32 - TEMPERATURE_OFFSET).map_err(|_| {
        let source = DecodeError::OutOfRange(raw_temperature);
        log::warn!("Cannot decode {} field: {source}", FrameField::Temperature);
        FrameError {
            field: FrameField::Temperature,
            source,
        }
    })?;
    let status = read_field(ring, SHORT_FIELD, FrameField::Status)? as u16;
    let afe_status = read_field(ring, SHORT_FIELD, FrameField::AfeStatus)? as u16;

    let mut cells_mv = Vec::with_capacity(cell_count);
    for n_cell in 0..cell_count {
        let mv = read_field(ring, SHORT_FIELD, FrameField::Cell(n_cell))? as u16;
        log::trace!("Cell #{} mV={}", n_cell + 1, mv);
        cells_mv.push(mv);
    }

    Ok(Telemetry {
        voltage_mv,
        current_ma,
        amp_hours_mah,
        cycle_count,
        soc_percent,
        temperature_dc,
        status,
        afe_status,
        cells_mv,
        flags: decode_flags(status, afe_status),
    })
}

/// Decode a captured frame held in memory, e.g. from a log file.
///
/// Anything from the first terminator byte on is ignored.
pub fn decode_frame_bytes(frame: &[u8], cell_count: usize) -> Result<Telemetry, FrameError> {
    let end = frame
        .iter()
        .position(|b| *b == TERMINATOR_BYTE)
        .unwrap_or(frame.len());
    let mut ring = ByteRing::from(&frame[..end]);
    decode_frame(&mut ring, cell_count)
}
