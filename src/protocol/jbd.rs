//! JBD ("Xiaoxiang") smart BMS protocol.
//!
//! Requests are 7 bytes: `DD A5 <command> 00 <checksum hi> <checksum lo> 77`.
//! Replies arrive on the notify characteristic, possibly split over several
//! notifications, and look like
//!
//! | Offset     | Meaning                                       |
//! |------------|-----------------------------------------------|
//! | 0          | start byte 0xDD                               |
//! | 1          | command the reply answers                     |
//! | 2          | status, 0x00 = ok                             |
//! | 3          | payload length n                              |
//! | 4..4+n     | payload                                       |
//! | 4+n..6+n   | checksum, 0x10000 - sum(status, n, payload)   |
//! | 6+n        | end byte 0x77                                 |

use super::{validate_len, Field};
use crate::sample::{BmsSample, CellIndexBase, CellVoltages};
use crate::{Error, Result};
use uuid::Uuid;

pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

pub const START_BYTE: u8 = 0xDD;
pub const READ_BYTE: u8 = 0xA5;
pub const END_BYTE: u8 = 0x77;

pub const BASIC_INFO: u8 = 0x03;
pub const CELL_VOLTAGES: u8 = 0x04;
pub const HARDWARE_VERSION: u8 = 0x05;

const HEADER_LENGTH: usize = 4;
// checksum (2) + end byte
const FOOTER_LENGTH: usize = 3;

/// Builds the read request for `command`.
pub fn command(command: u8) -> [u8; 7] {
    [
        START_BYTE,
        READ_BYTE,
        command,
        0x00,
        0xFF,
        0xFFu8.wrapping_sub(command.wrapping_sub(1)),
        END_BYTE,
    ]
}

/// The command a complete reply answers.
pub fn command_of(frame: &[u8]) -> Option<u8> {
    frame.get(1).copied()
}

fn calc_checksum(bytes: &[u8]) -> u16 {
    let sum = bytes
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    0u16.wrapping_sub(sum)
}

/// Checks framing, status and checksum and returns the payload.
fn validate_reply(frame: &[u8]) -> Result<&[u8]> {
    validate_len(frame, HEADER_LENGTH + FOOTER_LENGTH)?;
    if frame[0] != START_BYTE {
        log::warn!("Missing start byte - frame={frame:02X?}");
        return Err(Error::InvalidFrame("missing start byte"));
    }
    if frame[frame.len() - 1] != END_BYTE {
        log::warn!("Missing end byte - frame={frame:02X?}");
        return Err(Error::InvalidFrame("missing end byte"));
    }
    if frame[2] != 0x00 {
        log::warn!("Command 0x{:02X} rejected with status 0x{:02X}", frame[1], frame[2]);
        return Err(Error::DeviceStatus(frame[2]));
    }
    let data_end = HEADER_LENGTH + usize::from(frame[3]);
    validate_len(frame, data_end + FOOTER_LENGTH)?;
    let calculated = calc_checksum(&frame[2..data_end]);
    let received = u16::from_be_bytes([frame[data_end], frame[data_end + 1]]);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} frame={frame:02X?}"
        );
        return Err(Error::Checksum {
            calculated,
            received,
        });
    }
    Ok(&frame[HEADER_LENGTH..data_end])
}

const VOLTAGE: Field = Field::be_signed(0, 2);
const CURRENT: Field = Field::be_signed(2, 2);
const CHARGE: Field = Field::be_signed(4, 2);
const CHARGE_FULL: Field = Field::be_signed(6, 2);
const NUM_CYCLES: Field = Field::be_signed(8, 2);
const MANUFACTURE_DATE: Field = Field::be_signed(10, 2);
const BALANCE_STATUS: Field = Field::be(12, 4);
const PROTECTION_STATUS: Field = Field::be(16, 2);
const SOFTWARE_VERSION: Field = Field::be(18, 1);
const SOC: Field = Field::be(19, 1);
const FET_STATUS: Field = Field::be(20, 1);
const NUM_CELL: Field = Field::be(21, 1);
const NUM_TEMP: Field = Field::be(22, 1);

const TEMPERATURE_OFFSET: usize = 23;

const fn temperature(sensor: usize) -> Field {
    Field::be(TEMPERATURE_OFFSET + sensor * 2, 2)
}

/// Offset of 0 °C in the deci-Kelvin temperature encoding.
const KELVIN_OFFSET: i64 = 2731;

/// Reply to [`BASIC_INFO`].
#[derive(Debug, Clone, PartialEq)]
pub struct BasicInfo {
    pub voltage: f32,
    /// Raw signed value, the polarity for charge/discharge is not documented
    pub current: f32,
    pub charge: f32,
    pub charge_full: f32,
    /// Signed on the wire. Counts above 32767 read negative and are left out
    /// of [`BasicInfo::to_sample`].
    pub num_cycles: i16,
    /// Packed as `(year - 2000) << 9 | month << 5 | day`
    pub manufacture_date: i16,
    /// Bit n set = cell n is balancing
    pub balance_status: u32,
    pub protection_status: u16,
    pub software_version: u8,
    pub soc_percent: u8,
    pub fet_status: u8,
    pub num_cell: u8,
    pub temperatures: Vec<f32>,
}

impl BasicInfo {
    pub fn request() -> [u8; 7] {
        command(BASIC_INFO)
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let payload = validate_reply(frame)?;
        validate_len(payload, NUM_TEMP.end())?;
        let num_temp = NUM_TEMP.read(payload)? as usize;
        validate_len(payload, TEMPERATURE_OFFSET + num_temp * 2)?;
        let temperatures = (0..num_temp)
            .map(|sensor| {
                let raw = temperature(sensor).read(payload)?;
                Ok((raw - KELVIN_OFFSET) as f32 / 10.0)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            voltage: VOLTAGE.read_scaled(payload, 100.0)?,
            current: CURRENT.read_scaled(payload, 100.0)?,
            charge: CHARGE.read_scaled(payload, 100.0)?,
            charge_full: CHARGE_FULL.read_scaled(payload, 100.0)?,
            num_cycles: NUM_CYCLES.read(payload)? as i16,
            manufacture_date: MANUFACTURE_DATE.read(payload)? as i16,
            balance_status: BALANCE_STATUS.read(payload)? as u32,
            protection_status: PROTECTION_STATUS.read(payload)? as u16,
            software_version: SOFTWARE_VERSION.read(payload)? as u8,
            soc_percent: SOC.read(payload)? as u8,
            fet_status: FET_STATUS.read(payload)? as u8,
            num_cell: NUM_CELL.read(payload)? as u8,
            temperatures,
        })
    }

    /// `(year, month, day)` of manufacture.
    pub fn manufacture_ymd(&self) -> (u16, u8, u8) {
        let raw = self.manufacture_date as u16;
        (2000 + (raw >> 9), ((raw >> 5) & 0x0F) as u8, (raw & 0x1F) as u8)
    }

    pub fn charge_enabled(&self) -> bool {
        self.fet_status & 0x01 != 0
    }

    pub fn discharge_enabled(&self) -> bool {
        self.fet_status & 0x02 != 0
    }

    pub fn to_sample(&self) -> BmsSample {
        BmsSample {
            voltage: Some(self.voltage),
            current: Some(self.current),
            charge: Some(self.charge),
            charge_full: Some(self.charge_full),
            num_cycles: u32::try_from(self.num_cycles).ok(),
            soc: Some(f32::from(self.soc_percent)),
            temperatures: self.temperatures.clone(),
        }
    }
}

/// Reply to [`CELL_VOLTAGES`], cells numbered from 0.
pub struct CellVoltageReply;

impl CellVoltageReply {
    pub fn request() -> [u8; 7] {
        command(CELL_VOLTAGES)
    }

    pub fn decode(frame: &[u8]) -> Result<CellVoltages> {
        validate_reply(frame)?;
        let num_cell = usize::from(frame[3] / 2);
        let volts = (0..num_cell)
            .map(|cell| {
                let millivolts = Field::be(HEADER_LENGTH + cell * 2, 2).read(frame)?;
                log::trace!("cell #{cell} mV={millivolts}");
                Ok(millivolts as f32 / 1000.0)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CellVoltages::new(CellIndexBase::Zero, volts))
    }
}

/// Reply to [`HARDWARE_VERSION`], an ASCII model string.
pub struct HardwareVersion;

impl HardwareVersion {
    pub fn request() -> [u8; 7] {
        command(HARDWARE_VERSION)
    }

    pub fn decode(frame: &[u8]) -> Result<String> {
        let payload = validate_reply(frame)?;
        Ok(String::from_utf8_lossy(payload)
            .trim_end_matches('\0')
            .to_string())
    }
}

/// Wraps `payload` into a well formed reply for `command`.
#[cfg(test)]
pub(crate) fn reply_frame(command: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![START_BYTE, command, 0x00, payload.len() as u8];
    frame.extend_from_slice(payload);
    let checksum = calc_checksum(&frame[2..]);
    frame.extend_from_slice(&checksum.to_be_bytes());
    frame.push(END_BYTE);
    frame
}
