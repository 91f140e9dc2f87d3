//! Scripted in-memory transport for driver tests.

use super::{GattTransport, NotifyCallback};
use crate::error::BoxError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct Script {
    connected: bool,
    fail_connect: bool,
    fail_notify: bool,
    /// writes left to fail
    fail_writes: usize,
    /// scripted replies left to swallow
    skip_replies: usize,
    callback: Option<NotifyCallback>,
    subscribed: Vec<Uuid>,
    /// request bytes -> notification chunks sent in response
    replies: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    reply_delay: Option<Duration>,
    reads: HashMap<Uuid, Vec<u8>>,
    written: Vec<(Uuid, Vec<u8>)>,
    connects: usize,
    disconnects: usize,
}

impl Script {
    fn notify(&mut self, chunk: &[u8]) {
        if let Some(callback) = self.callback.as_mut() {
            callback(chunk);
        }
    }
}

/// Cloning shares the script, so a test keeps a handle after moving one into a driver.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    /// Answers `request` with `chunks`, one notification each.
    pub(crate) fn reply(&self, request: &[u8], chunks: Vec<Vec<u8>>) {
        self.script().replies.insert(request.to_vec(), chunks);
    }

    /// Delivers replies from a spawned task after `delay` instead of inline.
    pub(crate) fn delay_replies(&self, delay: Duration) {
        self.script().reply_delay = Some(delay);
    }

    pub(crate) fn set_read(&self, characteristic: Uuid, data: Vec<u8>) {
        self.script().reads.insert(characteristic, data);
    }

    pub(crate) fn fail_connect(&self) {
        self.set_fail_connect(true);
    }

    pub(crate) fn fail_notify(&self) {
        self.script().fail_notify = true;
    }

    pub(crate) fn fail_write(&self) {
        self.fail_next_writes(usize::MAX);
    }

    pub(crate) fn fail_next_writes(&self, count: usize) {
        self.script().fail_writes = count;
    }

    /// Leaves the next `count` scripted requests unanswered.
    pub(crate) fn skip_replies(&self, count: usize) {
        self.script().skip_replies = count;
    }

    pub(crate) fn set_fail_connect(&self, fail: bool) {
        self.script().fail_connect = fail;
    }

    /// Pushes an unsolicited notification.
    pub(crate) fn notify(&self, chunk: &[u8]) {
        self.script().notify(chunk);
    }

    pub(crate) fn written(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.script().written.clone()
    }

    pub(crate) fn subscribed(&self) -> Vec<Uuid> {
        self.script().subscribed.clone()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.script().connected
    }

    pub(crate) fn connects(&self) -> usize {
        self.script().connects
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.script().disconnects
    }
}

#[async_trait]
impl GattTransport for MockTransport {
    async fn connect(&mut self) -> Result<(), BoxError> {
        let mut script = self.script();
        if script.fail_connect {
            return Err("adapter unavailable".into());
        }
        script.connected = true;
        script.connects += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BoxError> {
        let mut script = self.script();
        script.connected = false;
        script.callback = None;
        script.disconnects += 1;
        Ok(())
    }

    async fn start_notify(
        &mut self,
        characteristic: Uuid,
        callback: NotifyCallback,
    ) -> Result<(), BoxError> {
        let mut script = self.script();
        if script.fail_notify {
            return Err("characteristic not found".into());
        }
        script.subscribed.push(characteristic);
        script.callback = Some(callback);
        Ok(())
    }

    async fn stop_notify(&mut self, characteristic: Uuid) -> Result<(), BoxError> {
        let mut script = self.script();
        script.subscribed.retain(|uuid| *uuid != characteristic);
        script.callback = None;
        Ok(())
    }

    async fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<(), BoxError> {
        let mut script = self.script();
        if script.fail_writes > 0 {
            script.fail_writes -= 1;
            return Err("write failed".into());
        }
        script.written.push((characteristic, data.to_vec()));
        let Some(chunks) = script.replies.get(data).cloned() else {
            return Ok(());
        };
        if script.skip_replies > 0 {
            script.skip_replies -= 1;
            return Ok(());
        }
        match script.reply_delay {
            None => chunks.iter().for_each(|chunk| script.notify(chunk)),
            Some(delay) => {
                let shared = self.script.clone();
                tokio::spawn(async move {
                    for chunk in chunks {
                        tokio::time::sleep(delay).await;
                        shared.lock().unwrap().notify(&chunk);
                    }
                });
            }
        }
        Ok(())
    }

    async fn read_characteristic(&mut self, characteristic: Uuid) -> Result<Vec<u8>, BoxError> {
        self.script()
            .reads
            .get(&characteristic)
            .cloned()
            .ok_or_else(|| "nothing to read".into())
    }
}
