use std::time::Duration;

/// Boxed error returned by a [`crate::transport::GattTransport`] implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by the codecs, the request table and the drivers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connecting to the device or subscribing to its notify characteristic failed.
    /// The session is gone, the caller has to connect again.
    #[error("Cannot connect: {source}")]
    ConnectError {
        #[source]
        source: BoxError,
    },
    /// A request for this command id is already waiting for its reply.
    #[error("Command 0x{command:02X} is already waiting for a reply")]
    AlreadyPending { command: u8 },
    /// No reply for the command arrived in time. The connection is still usable.
    #[error("No reply for command 0x{command:02X} within {timeout:?}")]
    Timeout { command: u8, timeout: Duration },
    /// The reply is shorter than the layout requires.
    #[error("Malformed frame - required={expected} received={received}")]
    MalformedFrame { expected: usize, received: usize },
    /// The reply has the right size but a broken structure.
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),
    /// A complete frame arrived that nobody is waiting for.
    #[error("Unexpected frame for command 0x{command:02X}")]
    UnmatchedFrame { command: u8 },
    #[error("Checksum mismatch - calculated={calculated:04X} received={received:04X}")]
    Checksum { calculated: u16, received: u16 },
    /// The device answered with a non-zero status byte.
    #[error("Device reported status 0x{0:02X}")]
    DeviceStatus(u8),
    /// The reassembly buffer grew past its cap and was discarded.
    #[error("Frame buffer overflow - {len} bytes exceed capacity of {capacity}")]
    FrameOverflow { len: usize, capacity: usize },
    #[error("Not connected")]
    NotConnected,
    /// Writing or reading a characteristic failed on an established session.
    #[error("Transport error: {source}")]
    Transport {
        #[source]
        source: BoxError,
    },
}

impl Error {
    pub(crate) fn connect(source: impl Into<BoxError>) -> Self {
        Self::ConnectError {
            source: source.into(),
        }
    }

    pub(crate) fn transport(source: impl Into<BoxError>) -> Self {
        Self::Transport {
            source: source.into(),
        }
    }

    /// Whether repeating the same request on the same connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::Transport { .. }
                | Error::Checksum { .. }
                | Error::FrameOverflow { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::Timeout {
            command: 3,
            timeout: Duration::from_secs(8)
        }
        .is_retryable());
        assert!(!Error::AlreadyPending { command: 3 }.is_retryable());
        assert!(!Error::MalformedFrame {
            expected: 27,
            received: 4
        }
        .is_retryable());
        assert!(!Error::connect("adapter gone").is_retryable());
    }

    #[test]
    fn display_uses_hex_command() {
        let err = Error::UnmatchedFrame { command: 0x04 };
        assert_eq!(err.to_string(), "Unexpected frame for command 0x04");
    }
}
