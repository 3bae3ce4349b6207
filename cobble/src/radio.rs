//! The transceiver-facing driver contract.
//!
//! The Link-Layer engine consumes a [`Radio`]: an abstract 2.4 GHz transceiver that can be
//! programmed for raw BLE packets (1 Mbps GFSK with BT=0.5 and modulation index 0.5, 4-byte sync
//! word, CRC-24 trailer, data whitening) but knows nothing about the protocol above. Chips like
//! the SX128x family or an nRF radio in fixed-length mode fit this contract.
//!
//! All methods are blocking, with every internal wait on a chip-busy signal bounded by
//! [`BUSY_WAIT_TIMEOUT_MS`]. The driver reports completion through a packed IRQ status word
//! ([`Irq`]) that the Link-Layer polls and clears. When the platform routes the radio's interrupt
//! line to a handler, that handler should only latch the status word into an [`IrqFlag`] and
//! return; the protocol logic always runs in the foreground.

use core::sync::atomic::{AtomicBool, AtomicU16, Ordering};

use bitflags::bitflags;

/// Upper bound on any internal wait for the transceiver's busy signal, in milliseconds.
///
/// A driver whose chip stays busy longer than this must give up and return
/// [`RadioError::Hal`].
pub const BUSY_WAIT_TIMEOUT_MS: u32 = 10;

/// Errors reported by `Radio` implementations.
///
/// This type is deliberately separate from the stack's own error type: drivers know nothing about
/// the protocol, and the Link-Layer engine is the only place where radio errors are lifted into
/// protocol errors.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum RadioError {
    /// Chip-level I/O failure (SPI transfer error, busy signal stuck, invalid chip state).
    Hal,

    /// The requested operation conflicts with an operation still in progress.
    Busy,

    /// A bounded wait inside the driver expired.
    Timeout,
}

bitflags! {
    /// Packed radio IRQ status word.
    pub struct Irq: u16 {
        /// Packet transmission has completed.
        const TX_DONE = 1 << 0;
        /// A packet has been received completely and passed the CRC check.
        const RX_DONE = 1 << 1;
        /// The sync word (access address) was detected in the air.
        const SYNC_VALID = 1 << 2;
        /// A packet was received but its CRC check failed.
        const CRC_ERROR = 1 << 3;
        /// The receive window elapsed without detecting a packet.
        const RX_TIMEOUT = 1 << 4;
    }
}

/// An abstract transceiver exposing a raw BLE physical-layer packet interface.
///
/// The Link-Layer owns the radio exclusively and acquires TX/RX mode per connection event,
/// returning the chip to standby at the end of each event.
pub trait Radio {
    /// Puts the transceiver into BLE packet mode.
    ///
    /// This selects the BLE packet type, 1 Mbps GFSK modulation (BT=0.5, modulation index 0.5),
    /// and the BLE framing parameters: a 3-byte CRC trailer, standard (uncoded) packets and data
    /// whitening enabled. Called once before scanning starts; the per-channel and per-connection
    /// parameters are programmed through the other methods.
    fn enter_ble_mode(&mut self) -> Result<(), RadioError>;

    /// Tunes the transceiver to the given RF frequency in Hz.
    fn set_frequency(&mut self, hz: u32) -> Result<(), RadioError>;

    /// Programs the 4-byte sync word from an access address.
    ///
    /// The access address is transmitted little-endian on air; drivers for chips that take the
    /// sync word in transmission order must byte-reverse the value accordingly.
    fn set_access_address(&mut self, access_address: u32) -> Result<(), RadioError>;

    /// Sets the 24-bit CRC initialization value (the lower 24 bits of `init`).
    fn set_crc_init(&mut self, init: u32) -> Result<(), RadioError>;

    /// Sets the 7-bit data whitening seed (`channel_index | 0x40`).
    fn set_whitening_seed(&mut self, seed: u8) -> Result<(), RadioError>;

    /// Copies `data` into the packet buffer starting at `offset`.
    fn write_buffer(&mut self, offset: u8, data: &[u8]) -> Result<(), RadioError>;

    /// Reads `data.len()` bytes from the packet buffer starting at `offset`.
    fn read_buffer(&mut self, offset: u8, data: &mut [u8]) -> Result<(), RadioError>;

    /// Returns the transceiver to standby, aborting any TX or RX in progress.
    fn standby(&mut self) -> Result<(), RadioError>;

    /// Starts transmitting the packet buffer contents.
    ///
    /// Completion is signalled through [`Irq::TX_DONE`]; this method only kicks off the
    /// transmission.
    fn transmit(&mut self) -> Result<(), RadioError>;

    /// Starts listening for a packet, for at most `timeout_ms` milliseconds.
    ///
    /// The outcome is signalled through the IRQ status word: [`Irq::RX_DONE`] for a good packet,
    /// [`Irq::CRC_ERROR`] for a corrupted one, [`Irq::RX_TIMEOUT`] when the window elapsed.
    fn receive(&mut self, timeout_ms: u32) -> Result<(), RadioError>;

    /// Reads the packed IRQ status word.
    fn irq_status(&mut self) -> Result<Irq, RadioError>;

    /// Clears the IRQ bits set in `mask`.
    fn clear_irq(&mut self, mask: Irq) -> Result<(), RadioError>;

    /// Returns the RSSI of the most recently received packet, in dBm.
    fn rssi(&mut self) -> Result<i8, RadioError>;
}

/// Interrupt-to-foreground handoff cell for radio IRQ lines.
///
/// The concurrency model of this stack allows the radio interrupt handler to do exactly two
/// things: note that an interrupt fired and snapshot the IRQ status word. `IrqFlag` is that
/// one shared cell, implemented with single-word atomics so no further interrupt masking is
/// required. A driver whose chip needs its status register read over a bus can instead set the
/// flag alone from the handler and read the register from `irq_status`.
#[derive(Default)]
pub struct IrqFlag {
    fired: AtomicBool,
    status: AtomicU16,
}

impl IrqFlag {
    /// Creates a cleared flag.
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            status: AtomicU16::new(0),
        }
    }

    /// Called from the interrupt handler: records `status` and marks the flag as fired.
    pub fn set(&self, status: Irq) {
        self.status.fetch_or(status.bits(), Ordering::Relaxed);
        self.fired.store(true, Ordering::Release);
    }

    /// Called from the foreground: takes the accumulated status word, if an interrupt fired since
    /// the last call.
    pub fn take(&self) -> Option<Irq> {
        if self.fired.swap(false, Ordering::Acquire) {
            let bits = self.status.swap(0, Ordering::Relaxed);
            Some(Irq::from_bits_truncate(bits))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_flag_accumulates_until_taken() {
        let flag = IrqFlag::new();
        assert_eq!(flag.take(), None);

        flag.set(Irq::SYNC_VALID);
        flag.set(Irq::RX_DONE);
        assert_eq!(flag.take(), Some(Irq::SYNC_VALID | Irq::RX_DONE));
        assert_eq!(flag.take(), None);
    }
}
