//! Power Queen LiFePO4 BMS.
//!
//! The battery info block is read straight from the data characteristic. All
//! multi-byte values in it are stored little-endian.

use super::{validate_len, Field};
use crate::sample::{BmsSample, CellIndexBase, CellVoltages};
use crate::Result;
use uuid::Uuid;

pub const DATA_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000ffe2_0000_1000_8000_00805f9b34fb);

// checksum already included
const GET_VERSION: [u8; 8] = [0x00, 0x00, 0x04, 0x01, 0x16, 0x55, 0xAA, 0x1A];
const GET_BATTERY_INFO: [u8; 8] = [0x00, 0x00, 0x04, 0x01, 0x13, 0x55, 0xAA, 0x17];

/// Ends a notification frame.
pub const END_BYTE: u8 = b'w';

const COMMAND_OFFSET: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerQueenCommand {
    Version,
    BatteryInfo,
}

impl PowerQueenCommand {
    pub fn bytes(self) -> &'static [u8; 8] {
        match self {
            PowerQueenCommand::Version => &GET_VERSION,
            PowerQueenCommand::BatteryInfo => &GET_BATTERY_INFO,
        }
    }

    pub fn id(self) -> u8 {
        self.bytes()[COMMAND_OFFSET]
    }
}

/// The command a notification frame answers.
pub fn command_of(frame: &[u8]) -> Option<u8> {
    frame.get(COMMAND_OFFSET).copied()
}

const PACK_VOLTAGE: Field = Field::le(8, 4);
const VOLTAGE: Field = Field::le(12, 4);
const CELLS_OFFSET: usize = 16;
const CELL_SLOTS: usize = 16;
const CURRENT: Field = Field::le_signed(48, 4);
const CELL_TEMPERATURE: Field = Field::le_signed(52, 2);
const MOSFET_TEMPERATURE: Field = Field::le_signed(54, 2);
const CHARGE: Field = Field::le(62, 2);
const CHARGE_FULL: Field = Field::le(64, 2);
const SOC: Field = Field::le(90, 2);
const SOH: Field = Field::le(92, 4);
const DISCHARGE_CYCLES: Field = Field::le(96, 4);
const DISCHARGED_AH: Field = Field::le(100, 4);

const fn cell(slot: usize) -> Field {
    Field::le(CELLS_OFFSET + slot * 2, 2)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatteryInfo {
    pub pack_voltage: f32,
    pub voltage: f32,
    /// Numbered from 1, empty slots are left out
    pub cells: CellVoltages,
    pub current: f32,
    pub cell_temperature: f32,
    pub mosfet_temperature: f32,
    pub charge: f32,
    pub charge_full: f32,
    pub soc_percent: u16,
    pub soh_percent: u32,
    pub discharge_cycles: u32,
    pub discharged_ah: f32,
}

impl BatteryInfo {
    pub fn request() -> &'static [u8; 8] {
        PowerQueenCommand::BatteryInfo.bytes()
    }

    pub fn reply_size() -> usize {
        DISCHARGED_AH.end()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        validate_len(data, Self::reply_size())?;
        let mut volts = Vec::with_capacity(CELL_SLOTS);
        for slot in 0..CELL_SLOTS {
            let millivolts = cell(slot).read(data)?;
            if millivolts == 0 {
                continue;
            }
            log::trace!("cell #{} mV={millivolts}", volts.len() + 1);
            volts.push(millivolts as f32 / 1000.0);
        }
        Ok(Self {
            pack_voltage: PACK_VOLTAGE.read_scaled(data, 1000.0)?,
            voltage: VOLTAGE.read_scaled(data, 1000.0)?,
            cells: CellVoltages::new(CellIndexBase::One, volts),
            current: CURRENT.read_scaled(data, 1000.0)?,
            cell_temperature: CELL_TEMPERATURE.read(data)? as f32,
            mosfet_temperature: MOSFET_TEMPERATURE.read(data)? as f32,
            charge: CHARGE.read_scaled(data, 100.0)?,
            charge_full: CHARGE_FULL.read_scaled(data, 100.0)?,
            soc_percent: SOC.read(data)? as u16,
            soh_percent: SOH.read(data)? as u32,
            discharge_cycles: DISCHARGE_CYCLES.read(data)? as u32,
            discharged_ah: DISCHARGED_AH.read_scaled(data, 1000.0)?,
        })
    }

    pub fn to_sample(&self) -> BmsSample {
        BmsSample {
            voltage: Some(self.voltage),
            current: Some(self.current),
            charge: Some(self.charge),
            charge_full: Some(self.charge_full),
            num_cycles: Some(self.discharge_cycles),
            soc: Some(f32::from(self.soc_percent)),
            temperatures: vec![self.cell_temperature, self.mosfet_temperature],
        }
    }
}
