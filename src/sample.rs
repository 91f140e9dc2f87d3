use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// One telemetry read, normalized across vendors.
///
/// Fields a vendor does not report stay `None`. The sign of `current` is
/// passed through as the device reports it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BmsSample {
    /// Pack voltage in V
    pub voltage: Option<f32>,
    /// Pack current in A
    pub current: Option<f32>,
    /// Remaining charge in Ah
    pub charge: Option<f32>,
    /// Full charge capacity in Ah
    pub charge_full: Option<f32>,
    pub num_cycles: Option<u32>,
    /// State of charge in %
    pub soc: Option<f32>,
    /// Sensor temperatures in °C, in device order
    pub temperatures: Vec<f32>,
}

/// Where the device starts counting cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellIndexBase {
    Zero,
    One,
}

impl CellIndexBase {
    fn offset(self) -> usize {
        match self {
            CellIndexBase::Zero => 0,
            CellIndexBase::One => 1,
        }
    }
}

/// Per-cell voltages in V, in physical cell order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellVoltages {
    base: CellIndexBase,
    volts: Vec<f32>,
}

impl CellVoltages {
    pub fn new(base: CellIndexBase, volts: Vec<f32>) -> Self {
        Self { base, volts }
    }

    pub fn base(&self) -> CellIndexBase {
        self.base
    }

    /// `(cell position, volts)` pairs numbered the way the device numbers them.
    pub fn indexed(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        let offset = self.base.offset();
        self.volts
            .iter()
            .enumerate()
            .map(move |(i, v)| (i + offset, *v))
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.volts
    }
}

impl Deref for CellVoltages {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        &self.volts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_respects_base() {
        let zero = CellVoltages::new(CellIndexBase::Zero, vec![3.3, 3.31]);
        assert_eq!(zero.indexed().collect::<Vec<_>>(), vec![(0, 3.3), (1, 3.31)]);

        let one = CellVoltages::new(CellIndexBase::One, vec![3.3, 3.31]);
        assert_eq!(one.indexed().collect::<Vec<_>>(), vec![(1, 3.3), (2, 3.31)]);
        assert_eq!(one.len(), 2);
        assert_eq!(one[1], 3.31);
    }
}
