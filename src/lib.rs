#![cfg_attr(docsrs, feature(doc_cfg))]
//! # blebms_lib
//!
//! Drivers for battery management systems that talk over Bluetooth Low
//! Energy GATT characteristics. A request is written to one characteristic
//! and the reply arrives in notification chunks on another, so every driver
//! reassembles frames and correlates them with the command that asked for
//! them.
//!
//! Supported devices:
//! - JBD / Xiaoxiang smart BMS ([`driver::JbdDriver`])
//! - Power Queen LiFePO4 batteries ([`driver::PowerQueenDriver`])
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `blebms` command-line tool.
//! - `ble`: Enables [`transport::BluestTransport`], a transport on the platform Bluetooth stack using `bluest`.
//! - `publish`: Enables the [`publish`] module that turns samples into MQTT messages and Home Assistant discovery documents.
//! - `bin-dependencies`: Enables everything the `blebms` binary needs besides `ble`.

/// Contains error types for the library.
mod error;
/// Vendor drivers and the [`driver::BmsDriver`] trait.
pub mod driver;
/// Reassembly of notification chunks into frames.
pub mod frame;
/// Correlation of outstanding requests with their replies.
pub mod pending;
/// Command encoding and reply decoding per vendor.
pub mod protocol;
/// Vendor independent telemetry.
pub mod sample;
/// The GATT link a driver runs on.
pub mod transport;

/// MQTT topics and payloads for samples.
#[cfg_attr(docsrs, doc(cfg(feature = "publish")))]
#[cfg(feature = "publish")]
pub mod publish;

pub use driver::{BmsDriver, DriverConfig, DriverState};
pub use error::{BoxError, Error, Result};
pub use sample::{BmsSample, CellIndexBase, CellVoltages};
