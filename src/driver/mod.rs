//! Vendor drivers and the connection session they share.
//!
//! A session owns the transport, the reassembly buffer and the table of
//! pending requests of exactly one connection. The notification callback
//! installed on connect only holds clones of the latter two, so it can run on
//! the transport's thread while a fetch is suspended waiting for its reply.

pub mod jbd;
pub mod power_queen;

use crate::frame::{Frame, Reassembler};
use crate::pending::PendingTable;
use crate::sample::{BmsSample, CellVoltages};
use crate::transport::{GattTransport, NotifyCallback};
use crate::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

pub use self::jbd::JbdDriver;
pub use self::power_queen::PowerQueenDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Disconnected,
    /// Transport is up, notifications are not subscribed yet
    Connected,
    Subscribed,
    /// A command is written and its reply is outstanding
    Requesting,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// How long a fetch waits for its reply
    pub timeout: Duration,
    /// Cap of the reassembly buffer
    pub max_frame_len: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            max_frame_len: Reassembler::DEFAULT_CAPACITY,
        }
    }
}

/// What every BMS driver offers to a telemetry consumer.
#[async_trait]
pub trait BmsDriver: Send {
    /// Short vendor name, used in logs and topics.
    fn name(&self) -> &'static str;

    fn state(&self) -> DriverState;

    /// Connects the transport and subscribes to replies.
    async fn connect(&mut self) -> Result<()>;

    /// Releases subscription and transport. Calling it twice is fine.
    async fn disconnect(&mut self) -> Result<()>;

    async fn fetch(&mut self) -> Result<BmsSample>;

    async fn fetch_voltages(&mut self) -> Result<CellVoltages>;
}

/// Boxed future borrowing a driver, as returned by [`BmsDriver`] methods.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Runs `op` until it succeeds, fails with a non-retryable error or `retries`
/// extra attempts are used up.
///
/// After a [`Error::Transport`] the link is reconnected before the next
/// attempt. A failing reconnect ends the retries with its [`Error::ConnectError`].
///
/// ```no_run
/// # async fn run(bms: &mut dyn blebms_lib::BmsDriver) -> blebms_lib::Result<()> {
/// let sample = blebms_lib::driver::with_retries(bms, 3, "sample", |bms| bms.fetch()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retries<T, F>(
    bms: &mut dyn BmsDriver,
    retries: u8,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: for<'a> FnMut(&'a mut dyn BmsDriver) -> DriverFuture<'a, T>,
{
    let mut attempt = 0;
    loop {
        match op(&mut *bms).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < retries => {
                attempt += 1;
                log::warn!("Cannot get {what} ({err}), retry {attempt}/{retries}");
                if matches!(err, Error::Transport { .. }) {
                    if let Err(err) = bms.disconnect().await {
                        log::warn!("Disconnect failed: {err}");
                    }
                    bms.connect().await?;
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How a vendor frames and tags its replies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Framing {
    pub(crate) notify: Uuid,
    pub(crate) write: Uuid,
    pub(crate) terminator: u8,
    pub(crate) command_of: fn(&[u8]) -> Option<u8>,
    /// Replies are correlated from notifications. Without it, frames on the
    /// notify characteristic are only drained.
    pub(crate) notify_replies: bool,
}

/// Marks the session as requesting until dropped, also when the fetch
/// future is cancelled.
struct Requesting<'a>(&'a mut DriverState);

impl<'a> Requesting<'a> {
    fn start(state: &'a mut DriverState) -> Self {
        *state = DriverState::Requesting;
        Self(state)
    }
}

impl Drop for Requesting<'_> {
    fn drop(&mut self) {
        if *self.0 == DriverState::Requesting {
            *self.0 = DriverState::Subscribed;
        }
    }
}

pub(crate) struct Session<T> {
    transport: T,
    config: DriverConfig,
    framing: Framing,
    state: DriverState,
    reassembler: Arc<Mutex<Reassembler>>,
    pending: PendingTable,
}

impl<T: GattTransport> Session<T> {
    pub(crate) fn new(transport: T, framing: Framing, config: DriverConfig) -> Self {
        Self {
            transport,
            reassembler: Arc::new(Mutex::new(Reassembler::with_capacity(
                framing.terminator,
                config.max_frame_len,
            ))),
            config,
            framing,
            state: DriverState::Disconnected,
            pending: PendingTable::new(),
        }
    }

    pub(crate) fn state(&self) -> DriverState {
        self.state
    }

    pub(crate) fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Notification handler: reassemble, then hand the frame to its waiter.
    fn router(&self) -> NotifyCallback {
        let reassembler = self.reassembler.clone();
        let pending = self.pending.clone();
        let command_of = self.framing.command_of;
        let notify_replies = self.framing.notify_replies;
        Box::new(move |chunk: &[u8]| {
            log::trace!("notification: {chunk:02X?}");
            let frame = match lock(&reassembler).feed(chunk) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(err) => {
                    log::warn!("Dropping notification data: {err}");
                    return;
                }
            };
            let Some(command) = command_of(&frame) else {
                log::warn!("Dropping frame without command id: {frame:?}");
                return;
            };
            match pending.resolve(command, frame) {
                Ok(()) => {}
                Err(err) if notify_replies => log::warn!("{err}, dropped"),
                Err(err) => log::debug!("{err}, drained"),
            }
        })
    }

    pub(crate) async fn connect(&mut self) -> Result<()> {
        if self.state != DriverState::Disconnected {
            log::debug!("already connected");
            return Ok(());
        }
        self.transport.connect().await.map_err(Error::connect)?;
        self.state = DriverState::Connected;
        log::debug!("transport connected");

        lock(&self.reassembler).reset();
        let router = self.router();
        if let Err(err) = self
            .transport
            .start_notify(self.framing.notify, router)
            .await
        {
            log::warn!("Cannot subscribe to {}: {err}", self.framing.notify);
            if let Err(err) = self.transport.disconnect().await {
                log::debug!("disconnect after failed subscribe: {err}");
            }
            self.state = DriverState::Disconnected;
            return Err(Error::connect(err));
        }
        self.state = DriverState::Subscribed;
        log::debug!("subscribed to {}", self.framing.notify);
        Ok(())
    }

    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        if self.state == DriverState::Disconnected {
            return Ok(());
        }
        if let Err(err) = self.transport.stop_notify(self.framing.notify).await {
            log::debug!("stop notify: {err}");
        }
        self.pending.cancel_all();
        lock(&self.reassembler).reset();
        self.state = DriverState::Disconnected;
        self.transport.disconnect().await.map_err(Error::transport)?;
        log::debug!("disconnected");
        Ok(())
    }

    fn ensure_subscribed(&self) -> Result<()> {
        match self.state {
            DriverState::Subscribed | DriverState::Requesting => Ok(()),
            DriverState::Disconnected | DriverState::Connected => Err(Error::NotConnected),
        }
    }

    /// Writes `request` and waits for the reply tagged with `command`.
    pub(crate) async fn request(&mut self, command: u8, request: &[u8]) -> Result<Frame> {
        self.ensure_subscribed()?;
        let handle = self.pending.register(command)?;
        let _requesting = Requesting::start(&mut self.state);
        log::trace!("write bytes: {request:02X?}");
        match self
            .transport
            .write_characteristic(self.framing.write, request)
            .await
        {
            Ok(()) => handle.wait(self.config.timeout).await,
            Err(err) => Err(Error::transport(err)),
        }
    }

    /// Writes `request` and reads `characteristic` directly instead of waiting
    /// for a notification.
    pub(crate) async fn write_then_read(
        &mut self,
        command: u8,
        request: &[u8],
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        self.ensure_subscribed()?;
        let _requesting = Requesting::start(&mut self.state);
        let timeout = self.config.timeout;
        let write = self.framing.write;
        let transport = &mut self.transport;
        let result = tokio::time::timeout(timeout, async {
            log::trace!("write bytes: {request:02X?}");
            transport
                .write_characteristic(write, request)
                .await
                .map_err(Error::transport)?;
            transport
                .read_characteristic(characteristic)
                .await
                .map_err(Error::transport)
        })
        .await
        .unwrap_or(Err(Error::Timeout { command, timeout }));
        if let Ok(data) = &result {
            log::trace!("read bytes: {data:02X?}");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::jbd::reply_frame;
    use crate::protocol::jbd::tests::basic_info_payload;
    use crate::protocol::jbd::{self as jbd_protocol, BASIC_INFO};
    use crate::transport::mock::MockTransport;

    async fn connected(transport: &MockTransport) -> JbdDriver<MockTransport> {
        let mut bms = JbdDriver::with_config(
            transport.clone(),
            DriverConfig {
                timeout: Duration::from_millis(20),
                ..DriverConfig::default()
            },
        );
        bms.connect().await.unwrap();
        bms
    }

    fn answer_basic_info(transport: &MockTransport) {
        transport.reply(
            &jbd_protocol::command(BASIC_INFO),
            vec![reply_frame(BASIC_INFO, &basic_info_payload())],
        );
    }

    #[tokio::test]
    async fn retry_after_timeout() {
        let transport = MockTransport::new();
        answer_basic_info(&transport);
        transport.skip_replies(1);
        let mut bms = connected(&transport).await;

        let sample = with_retries(&mut bms, 3, "sample", |bms| bms.fetch())
            .await
            .unwrap();
        assert_eq!(sample.voltage, Some(13.0));
        assert_eq!(transport.written().len(), 2);
        // a timeout keeps the link
        assert_eq!(transport.connects(), 1);
    }

    #[tokio::test]
    async fn transport_error_reconnects() {
        let transport = MockTransport::new();
        answer_basic_info(&transport);
        transport.fail_next_writes(1);
        let mut bms = connected(&transport).await;

        assert!(with_retries(&mut bms, 3, "sample", |bms| bms.fetch())
            .await
            .is_ok());
        assert_eq!(transport.disconnects(), 1);
        assert_eq!(transport.connects(), 2);
        assert_eq!(bms.state(), DriverState::Subscribed);
    }

    #[tokio::test]
    async fn failed_reconnect_stops() {
        let transport = MockTransport::new();
        answer_basic_info(&transport);
        transport.fail_next_writes(1);
        let mut bms = connected(&transport).await;
        transport.set_fail_connect(true);

        assert!(matches!(
            with_retries(&mut bms, 3, "sample", |bms| bms.fetch()).await,
            Err(Error::ConnectError { .. })
        ));
        assert_eq!(bms.state(), DriverState::Disconnected);
    }

    #[tokio::test]
    async fn non_retryable_error_stops() {
        let transport = MockTransport::new();
        transport.reply(
            &jbd_protocol::command(BASIC_INFO),
            vec![reply_frame(BASIC_INFO, &[0x05, 0x14, 0x00])],
        );
        let mut bms = connected(&transport).await;

        assert!(matches!(
            with_retries(&mut bms, 3, "sample", |bms| bms.fetch()).await,
            Err(Error::MalformedFrame { .. })
        ));
        assert_eq!(transport.written().len(), 1);
    }

    #[tokio::test]
    async fn retries_run_out() {
        let transport = MockTransport::new();
        let mut bms = connected(&transport).await;

        assert!(matches!(
            with_retries(&mut bms, 2, "sample", |bms| bms.fetch()).await,
            Err(Error::Timeout { command: 0x03, .. })
        ));
        assert_eq!(transport.written().len(), 3);
    }

    #[tokio::test]
    async fn cancelled_fetch_returns_to_subscribed() {
        let transport = MockTransport::new();
        let mut bms = JbdDriver::new(transport.clone());
        bms.connect().await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(10), bms.fetch()).await;
        assert!(cancelled.is_err());
        assert_eq!(bms.state(), DriverState::Subscribed);
        assert!(bms.session.pending().is_empty());

        answer_basic_info(&transport);
        assert!(bms.fetch().await.is_ok());
    }

    #[test]
    fn only_jbd_correlates_notifications() {
        let transport = MockTransport::new();
        let jbd = JbdDriver::new(transport.clone());
        let power_queen = PowerQueenDriver::new(transport);
        assert!(jbd.session.framing.notify_replies);
        assert!(!power_queen.session.framing.notify_replies);
    }
}
