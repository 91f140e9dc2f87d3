use super::{BmsDriver, DriverConfig, DriverState, Framing, Session};
use crate::protocol::jbd::{self, BasicInfo, CellVoltageReply, HardwareVersion};
use crate::sample::{BmsSample, CellVoltages};
use crate::transport::GattTransport;
use crate::Result;
use async_trait::async_trait;

const FRAMING: Framing = Framing {
    notify: jbd::NOTIFY_CHARACTERISTIC,
    write: jbd::WRITE_CHARACTERISTIC,
    terminator: jbd::END_BYTE,
    command_of: jbd::command_of,
    notify_replies: true,
};

/// Driver for JBD / Xiaoxiang smart BMS boards.
///
/// # Example
///
/// ```no_run
/// # #[cfg(feature = "ble")]
/// # async fn run() -> Result<(), blebms_lib::Error> {
/// use blebms_lib::driver::{BmsDriver, JbdDriver};
/// use blebms_lib::transport::BluestTransport;
///
/// let mut bms = JbdDriver::new(BluestTransport::new("xiaoxiang BMS"));
/// bms.connect().await?;
/// let sample = bms.fetch().await?;
/// println!("{:?} V, {:?} A", sample.voltage, sample.current);
/// let cells = bms.fetch_voltages().await?;
/// println!("{cells:?}");
/// bms.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct JbdDriver<T> {
    pub(super) session: Session<T>,
}

impl<T: GattTransport> JbdDriver<T> {
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

    /// Everything the basic info block carries, including balance and FET state.
    pub async fn fetch_basic_info(&mut self) -> Result<BasicInfo> {
        log::trace!("get basic info");
        let frame = self
            .session
            .request(jbd::BASIC_INFO, &BasicInfo::request())
            .await?;
        BasicInfo::decode(&frame)
    }

    pub async fn fetch_hardware_version(&mut self) -> Result<String> {
        log::trace!("get hardware version");
        let frame = self
            .session
            .request(jbd::HARDWARE_VERSION, &HardwareVersion::request())
            .await?;
        HardwareVersion::decode(&frame)
    }
}

#[async_trait]
impl<T: GattTransport> BmsDriver for JbdDriver<T> {
    fn name(&self) -> &'static str {
        "jbd"
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
        Ok(self.fetch_basic_info().await?.to_sample())
    }

    async fn fetch_voltages(&mut self) -> Result<CellVoltages> {
        log::trace!("get cell voltages");
        let frame = self
            .session
            .request(jbd::CELL_VOLTAGES, &CellVoltageReply::request())
            .await?;
        CellVoltageReply::decode(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::jbd::reply_frame;
    use crate::protocol::jbd::tests::{basic_info_payload, cell_voltage_payload};
    use crate::sample::CellIndexBase;
    use crate::transport::mock::MockTransport;
    use crate::Error;
    use std::time::Duration;

    fn driver(transport: &MockTransport, timeout: Duration) -> JbdDriver<MockTransport> {
        JbdDriver::with_config(
            transport.clone(),
            DriverConfig {
                timeout,
                ..DriverConfig::default()
            },
        )
    }

    fn chunked(frame: Vec<u8>, size: usize) -> Vec<Vec<u8>> {
        frame.chunks(size).map(<[u8]>::to_vec).collect()
    }

    #[tokio::test]
    async fn connect_subscribes_notify_characteristic() {
        let transport = MockTransport::new();
        let mut bms = driver(&transport, Duration::from_secs(1));
        assert_eq!(bms.state(), DriverState::Disconnected);
        bms.connect().await.unwrap();
        assert_eq!(bms.state(), DriverState::Subscribed);
        assert!(transport.is_connected());
        assert_eq!(transport.subscribed(), vec![jbd::NOTIFY_CHARACTERISTIC]);
        // connecting again is a no-op
        bms.connect().await.unwrap();
        assert_eq!(transport.subscribed().len(), 1);
    }

    #[tokio::test]
    async fn fetch_reassembles_chunked_reply() {
        let transport = MockTransport::new();
        transport.reply(
            &jbd::command(jbd::BASIC_INFO),
            chunked(reply_frame(jbd::BASIC_INFO, &basic_info_payload()), 20),
        );
        let mut bms = driver(&transport, Duration::from_secs(1));
        bms.connect().await.unwrap();

        let sample = bms.fetch().await.unwrap();
        assert_eq!(sample.voltage, Some(13.0));
        assert_eq!(sample.current, Some(-2.5));
        assert_eq!(sample.charge, Some(80.0));
        assert_eq!(sample.charge_full, Some(100.0));
        assert_eq!(sample.num_cycles, Some(12));
        assert_eq!(sample.temperatures, vec![27.0, 25.5]);
        assert_eq!(bms.state(), DriverState::Subscribed);
        assert_eq!(
            transport.written(),
            vec![(
                jbd::WRITE_CHARACTERISTIC,
                vec![0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77]
            )]
        );
    }

    #[tokio::test]
    async fn fetch_voltages_with_delayed_reply() {
        let transport = MockTransport::new();
        transport.reply(
            &jbd::command(jbd::CELL_VOLTAGES),
            chunked(reply_frame(jbd::CELL_VOLTAGES, &cell_voltage_payload()), 5),
        );
        transport.delay_replies(Duration::from_millis(5));
        let mut bms = driver(&transport, Duration::from_secs(2));
        bms.connect().await.unwrap();

        let cells = bms.fetch_voltages().await.unwrap();
        assert_eq!(cells.base(), CellIndexBase::Zero);
        assert_eq!(&*cells, &[3.325, 3.331, 3.301, 3.328]);
    }

    #[tokio::test]
    async fn fetch_hardware_version() {
        let transport = MockTransport::new();
        transport.reply(
            &jbd::command(jbd::HARDWARE_VERSION),
            vec![reply_frame(jbd::HARDWARE_VERSION, b"JBD-SP04S034")],
        );
        let mut bms = driver(&transport, Duration::from_secs(1));
        bms.connect().await.unwrap();
        assert_eq!(bms.fetch_hardware_version().await.unwrap(), "JBD-SP04S034");
    }

    #[tokio::test]
    async fn timeout_keeps_connection_usable() {
        let transport = MockTransport::new();
        let mut bms = driver(&transport, Duration::from_millis(20));
        bms.connect().await.unwrap();

        let err = bms.fetch().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { command: 0x03, .. }));
        assert_eq!(bms.state(), DriverState::Subscribed);
        assert!(bms.session.pending().is_empty());

        // the late reply is dropped, not kept for the next request
        transport.notify(&reply_frame(jbd::BASIC_INFO, &basic_info_payload()));
        assert!(bms.session.pending().is_empty());

        transport.reply(
            &jbd::command(jbd::BASIC_INFO),
            vec![reply_frame(jbd::BASIC_INFO, &basic_info_payload())],
        );
        assert!(bms.fetch().await.is_ok());
    }

    #[tokio::test]
    async fn stray_reply_does_not_resolve_other_command() {
        let transport = MockTransport::new();
        // answer the voltage query with a basic info frame
        transport.reply(
            &jbd::command(jbd::CELL_VOLTAGES),
            vec![reply_frame(jbd::BASIC_INFO, &basic_info_payload())],
        );
        let mut bms = driver(&transport, Duration::from_millis(20));
        bms.connect().await.unwrap();
        assert!(matches!(
            bms.fetch_voltages().await,
            Err(Error::Timeout { command: 0x04, .. })
        ));
    }

    #[tokio::test]
    async fn already_pending_fails_fast() {
        let transport = MockTransport::new();
        let mut bms = driver(&transport, Duration::from_secs(1));
        bms.connect().await.unwrap();
        let _outstanding = bms.session.pending().register(jbd::BASIC_INFO).unwrap();
        assert!(matches!(
            bms.fetch().await,
            Err(Error::AlreadyPending { command: 0x03 })
        ));
        assert!(transport.written().is_empty());
    }

    #[tokio::test]
    async fn fetch_requires_connection() {
        let transport = MockTransport::new();
        let mut bms = driver(&transport, Duration::from_secs(1));
        assert!(matches!(bms.fetch().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn malformed_reply_is_reported() {
        let transport = MockTransport::new();
        transport.reply(
            &jbd::command(jbd::BASIC_INFO),
            vec![reply_frame(jbd::BASIC_INFO, &[0x05, 0x14, 0x00])],
        );
        let mut bms = driver(&transport, Duration::from_secs(1));
        bms.connect().await.unwrap();
        assert!(matches!(
            bms.fetch().await,
            Err(Error::MalformedFrame { .. })
        ));
        assert_eq!(bms.state(), DriverState::Subscribed);
    }

    #[tokio::test]
    async fn write_failure_releases_request() {
        let transport = MockTransport::new();
        let mut bms = driver(&transport, Duration::from_secs(1));
        bms.connect().await.unwrap();
        transport.fail_write();
        assert!(matches!(bms.fetch().await, Err(Error::Transport { .. })));
        assert!(!bms.session.pending().is_pending(jbd::BASIC_INFO));
    }

    #[tokio::test]
    async fn connect_failure_leaves_disconnected() {
        let transport = MockTransport::new();
        transport.fail_connect();
        let mut bms = driver(&transport, Duration::from_secs(1));
        assert!(matches!(
            bms.connect().await,
            Err(Error::ConnectError { .. })
        ));
        assert_eq!(bms.state(), DriverState::Disconnected);
    }

    #[tokio::test]
    async fn subscribe_failure_disconnects() {
        let transport = MockTransport::new();
        transport.fail_notify();
        let mut bms = driver(&transport, Duration::from_secs(1));
        assert!(matches!(
            bms.connect().await,
            Err(Error::ConnectError { .. })
        ));
        assert_eq!(bms.state(), DriverState::Disconnected);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let transport = MockTransport::new();
        let mut bms = driver(&transport, Duration::from_secs(1));
        bms.connect().await.unwrap();
        bms.disconnect().await.unwrap();
        bms.disconnect().await.unwrap();
        assert_eq!(bms.state(), DriverState::Disconnected);
        assert_eq!(transport.disconnects(), 1);
        assert!(transport.subscribed().is_empty());
    }
}
