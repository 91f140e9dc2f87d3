use super::{BmsDriver, DriverConfig, DriverState, Framing, Session};
use crate::protocol::power_queen::{self, BatteryInfo, PowerQueenCommand};
use crate::sample::{BmsSample, CellVoltages};
use crate::transport::GattTransport;
use crate::Result;
use async_trait::async_trait;

const FRAMING: Framing = Framing {
    notify: power_queen::DATA_CHARACTERISTIC,
    write: power_queen::WRITE_CHARACTERISTIC,
    terminator: power_queen::END_BYTE,
    command_of: power_queen::command_of,
    notify_replies: false,
};

/// Driver for Power Queen LiFePO4 batteries.
///
/// The battery info block is read from the data characteristic right after
/// the info command is written. Notifications on the same characteristic are
/// still subscribed and drained so they cannot pile up.
pub struct PowerQueenDriver<T> {
    pub(super) session: Session<T>,
}

impl<T: GattTransport> PowerQueenDriver<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, DriverConfig::default())
    }

    pub fn with_config(transport: T, config: DriverConfig) -> Self {
        Self {
            session: Session::new(transport, FRAMING, config),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        self.session.config()
    }

    pub fn transport(&self) -> &T {
        self.session.transport()
    }

    /// The full battery info block, including SOH and mosfet temperature.
    pub async fn fetch_info(&mut self) -> Result<BatteryInfo> {
        log::trace!("get battery info");
        let command = PowerQueenCommand::BatteryInfo;
        let data = self
            .session
            .write_then_read(command.id(), command.bytes(), power_queen::DATA_CHARACTERISTIC)
            .await?;
        BatteryInfo::decode(&data)
    }
}

#[async_trait]
impl<T: GattTransport> BmsDriver for PowerQueenDriver<T> {
    fn name(&self) -> &'static str {
        "power_queen"
    }

    fn state(&self) -> DriverState {
        self.session.state()
    }

    async fn connect(&mut self) -> Result<()> {
        self.session.connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.session.disconnect().await
    }

    async fn fetch(&mut self) -> Result<BmsSample> {
        Ok(self.fetch_info().await?.to_sample())
    }

    async fn fetch_voltages(&mut self) -> Result<CellVoltages> {
        Ok(self.fetch_info().await?.cells)
    }
}
