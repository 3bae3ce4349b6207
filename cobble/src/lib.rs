//! A BLE 4.2 Central-role host stack for raw 2.4 GHz transceivers.
//!
//! `cobble` implements the lower half of a Bluetooth Low Energy host: the Link-Layer connection
//! engine (scanning, initiating, channel hopping, the NESN/SN acknowledgement protocol and LL
//! control PDUs), an L2CAP fixed-channel multiplexer, an ATT client, and a small GATT facade that
//! can push text payloads to UART-style peripherals.
//!
//! The stack is hardware-agnostic and `#![no_std]`: the application provides implementations of
//! a few platform services and `cobble` does the rest:
//! * A microsecond-precision [`Timer`].
//! * A [`Radio`] driving a transceiver that exposes raw BLE packets (sync word, CRC seed and
//!   whitening seed are programmable; the chip does the GFSK/CRC/whitening legwork).
//! * A [`rand_core::RngCore`] used for access-address and device-address generation.
//!
//! Scheduling is single-threaded and cooperative: all protocol logic runs in the caller's
//! foreground loop, every wait is bounded, and interrupt handlers only have to latch the radio's
//! IRQ status word (see [`radio::IrqFlag`]).
//!
//! [`Timer`]: time/trait.Timer.html
//! [`Radio`]: radio/trait.Radio.html

#![no_std]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
pub mod utils;
pub mod att;
pub mod bytes;
pub mod central;
pub mod config;
pub mod crc;
mod error;
pub mod gatt;
pub mod l2cap;
pub mod link;
pub mod phy;
pub mod radio;
pub mod time;
pub mod uuid;

pub use self::error::Error;

use self::link::llcp::VersionNumber;

/// Version of the Bluetooth specification implemented by this stack.
pub const BLUETOOTH_VERSION: VersionNumber = VersionNumber::V4_2;
