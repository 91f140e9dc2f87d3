//! Correlates replies with the request that is waiting for them.
//!
//! Each in-flight command id owns one slot. The notification callback resolves
//! the slot from whatever thread the transport delivers on, while the caller
//! is suspended in [`WaitHandle::wait`].

use crate::frame::Frame;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug)]
struct Slot {
    serial: u64,
    sender: oneshot::Sender<Frame>,
}

#[derive(Debug, Default)]
struct Slots {
    next_serial: u64,
    by_command: HashMap<u8, Slot>,
}

/// Table of requests waiting for their reply, shared between the fetch path
/// and the notification path of one connection.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    slots: Arc<Mutex<Slots>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // A panic while holding the lock cannot leave the map half updated.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens the slot for `command`. Fails if a request for it is still open.
    pub fn register(&self, command: u8) -> Result<WaitHandle> {
        let mut slots = self.lock();
        if slots.by_command.contains_key(&command) {
            return Err(Error::AlreadyPending { command });
        }
        let serial = slots.next_serial;
        slots.next_serial = slots.next_serial.wrapping_add(1);
        let (sender, receiver) = oneshot::channel();
        slots.by_command.insert(command, Slot { serial, sender });
        log::trace!("registered command 0x{command:02X} (#{serial})");
        Ok(WaitHandle {
            command,
            serial,
            receiver,
            table: self.clone(),
        })
    }

    /// Hands `frame` to the request waiting for `command`.
    ///
    /// Without a waiter the frame is dropped and [`Error::UnmatchedFrame`] is
    /// returned. Other open requests are not touched.
    pub fn resolve(&self, command: u8, frame: Frame) -> Result<()> {
        let slot = self.lock().by_command.remove(&command);
        match slot {
            Some(slot) => {
                if slot.sender.send(frame).is_err() {
                    // the waiter gave up between our lookup and the send
                    log::debug!("waiter for command 0x{command:02X} already gone");
                }
                Ok(())
            }
            None => Err(Error::UnmatchedFrame { command }),
        }
    }

    pub fn is_pending(&self, command: u8) -> bool {
        self.lock().by_command.contains_key(&command)
    }

    pub fn len(&self) -> usize {
        self.lock().by_command.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every open request. Their waiters fail with [`Error::NotConnected`].
    pub fn cancel_all(&self) {
        let cancelled = std::mem::take(&mut self.lock().by_command);
        if !cancelled.is_empty() {
            log::debug!("cancelled {} pending requests", cancelled.len());
        }
    }

    fn remove_if_current(&self, command: u8, serial: u64) {
        let mut slots = self.lock();
        if slots
            .by_command
            .get(&command)
            .is_some_and(|slot| slot.serial == serial)
        {
            slots.by_command.remove(&command);
        }
    }
}

/// The caller's end of a registered request.
///
/// Dropping the handle releases its slot, so an abandoned request never
/// blocks the command id.
#[derive(Debug)]
pub struct WaitHandle {
    command: u8,
    serial: u64,
    receiver: oneshot::Receiver<Frame>,
    table: PendingTable,
}

impl WaitHandle {
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Suspends until the reply arrives or `timeout` elapses.
    pub async fn wait(mut self, timeout: Duration) -> Result<Frame> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                log::debug!(
                    "command 0x{:02X} timed out after {timeout:?}",
                    self.command
                );
                Err(Error::Timeout {
                    command: self.command,
                    timeout,
                })
            }
        }
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.table.remove_if_current(self.command, self.serial);
    }
}
