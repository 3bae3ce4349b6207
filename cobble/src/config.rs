//! Stack configuration trait.

use crate::{radio::Radio, time::Timer};
use rand_core::RngCore;

/// Trait bundling the platform services the stack is built on.
///
/// This trait defines the hardware interface types used throughout the layers of the BLE stack.
/// Every application defines one type implementing this trait and supplies it to
/// [`Central`](crate::central::Central).
pub trait Config {
    /// A time source with microsecond resolution.
    type Timer: Timer;

    /// The transceiver driver.
    type Radio: Radio;

    /// Random number generator used for access-address, CRC-init and device-address generation.
    ///
    /// An [`Lfsr`](crate::link::access_address::Lfsr) seeded from hardware entropy is sufficient;
    /// none of the generated material is security-relevant.
    type Rng: RngCore;
}
