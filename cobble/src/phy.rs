//! Physical layer parameters.
//!
//! Don't expect to see much code here: Most of this layer is hardware.
//!
//! BLE data is transmitted on 40 different RF channels numbered from 0 to 39 with ascending
//! frequencies. Channels 0, 12 and 39 are reserved for advertising, all others are used for data
//! transmission. BLE internally uses so-called "Channel Indices" which reorder the RF channels so
//! that indices 0..=36 refer to data channels and 37..=39 refer to the advertising channels
//! (presumably to simplify channel hopping). The Link-Layer is only interested in these channel
//! indices, so only those are implemented here.

use core::fmt;

/// Returns the center frequency in MHz corresponding to an RF channel.
fn rf_channel_freq(rf_channel: u8) -> u16 {
    2402 + u16::from(rf_channel) * 2
}

/// Returns the data whitening IV for a channel index (not RF channel).
///
/// The value is a 7-bit value: the 2 MSbs are always `01` and the remaining bits are the channel
/// index. The whitening polynomial is always `x^7 + x^4 + 1`, and whitening is applied to PDU and
/// CRC.
fn whitening_iv(channel_idx: u8) -> u8 {
    debug_assert!(channel_idx <= 39);
    0b0100_0000 | channel_idx
}

/// One of the three advertising channels (channel indices 37, 38 or 39).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AdvertisingChannel(u8);

impl AdvertisingChannel {
    /// Returns the first (lowest-numbered) advertising channel.
    pub fn first() -> Self {
        AdvertisingChannel(37)
    }

    /// Returns the next advertising channel, or the first one if `self` is the last channel.
    pub fn cycle(&self) -> Self {
        if self.0 == 39 {
            AdvertisingChannel(37)
        } else {
            AdvertisingChannel(self.0 + 1)
        }
    }

    /// Returns the channel index (37, 38 or 39).
    pub fn index(&self) -> u8 {
        self.0
    }

    /// Returns the RF channel corresponding to this advertising channel index.
    ///
    /// RF channels 0, 12 and 39 are used for advertising, placing the advertising frequencies at
    /// 2402, 2426 and 2480 MHz, spread across the band to dodge Wi-Fi.
    pub fn rf_channel(&self) -> u8 {
        match self.0 {
            37 => 0,
            38 => 12,
            39 => 39,
            _ => unreachable!(),
        }
    }

    /// Returns the center frequency of this channel in Hz.
    pub fn freq_hz(&self) -> u32 {
        u32::from(rf_channel_freq(self.rf_channel())) * 1_000_000
    }

    /// Calculates the initial value of the LFSR to use for data whitening.
    pub fn whitening_iv(&self) -> u8 {
        whitening_iv(self.0)
    }
}

/// One of 37 data channels on which data channel PDUs are sent between connected devices
/// (channel indices 0..=36).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DataChannel(u8);

impl DataChannel {
    /// Creates a `DataChannel` from a raw index.
    ///
    /// # Panics
    ///
    /// This will panic if `index` is not a valid data channel index. Valid indices are 0..=36.
    pub fn new(index: u8) -> Self {
        assert!(index <= 36);
        DataChannel(index)
    }

    /// Returns the data channel index.
    ///
    /// The returned value is always in range 0..=36.
    pub fn index(&self) -> u8 {
        self.0
    }

    /// Returns the RF channel corresponding to this data channel index.
    ///
    /// RF channels 1-11 and 13-38 are used for data transmission.
    pub fn rf_channel(&self) -> u8 {
        match self.0 {
            ch @ 0..=10 => ch + 1,
            ch @ 11..=36 => ch + 2,
            _ => unreachable!(),
        }
    }

    /// Returns the center frequency of this channel in Hz.
    pub fn freq_hz(&self) -> u32 {
        u32::from(rf_channel_freq(self.rf_channel())) * 1_000_000
    }

    /// Calculates the initial value of the LFSR to use for data whitening.
    pub fn whitening_iv(&self) -> u8 {
        whitening_iv(self.0)
    }
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataChannel({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertising_frequencies() {
        let ch37 = AdvertisingChannel::first();
        let ch38 = ch37.cycle();
        let ch39 = ch38.cycle();
        assert_eq!(ch37.freq_hz(), 2_402_000_000);
        assert_eq!(ch38.freq_hz(), 2_426_000_000);
        assert_eq!(ch39.freq_hz(), 2_480_000_000);
        assert_eq!(ch39.cycle(), ch37);
    }

    #[test]
    fn data_channels_interleave() {
        // Data channels fill the 2 MHz slots the advertising channels leave open.
        assert_eq!(DataChannel::new(0).freq_hz(), 2_404_000_000);
        assert_eq!(DataChannel::new(10).freq_hz(), 2_424_000_000);
        assert_eq!(DataChannel::new(11).freq_hz(), 2_428_000_000);
        assert_eq!(DataChannel::new(36).freq_hz(), 2_478_000_000);
    }

    #[test]
    fn whitening_seed_is_channel_with_bit_6() {
        assert_eq!(DataChannel::new(8).whitening_iv(), 0x48);
        assert_eq!(AdvertisingChannel::first().whitening_iv(), 0x65);
    }
}
