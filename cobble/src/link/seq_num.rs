use core::fmt;

/// A 1-bit data packet sequence number.
///
/// Two of these (`transmitSeqNum` and `nextExpectedSeqNum` in the Bluetooth spec) form the
/// Link-Layer's stop-and-wait ARQ. They only ever advance by toggling.
#[derive(PartialEq, Eq, Copy, Clone, Default)]
pub struct SeqNum(bool);

impl SeqNum {
    /// A sequence number of 0 (the value both sides start from).
    pub const ZERO: Self = SeqNum(false);

    /// A sequence number of 1.
    pub const ONE: Self = SeqNum(true);

    /// Advances the sequence number (1-bit wrapping increment).
    pub fn toggle(&mut self) {
        self.0 = !self.0;
    }

    /// Returns the sequence number following `self`.
    pub fn next(self) -> Self {
        SeqNum(!self.0)
    }

    /// Returns the header bit encoding this sequence number.
    pub fn bit(self) -> bool {
        self.0
    }
}

impl From<bool> for SeqNum {
    fn from(bit: bool) -> Self {
        SeqNum(bit)
    }
}

impl fmt::Debug for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0 { "1" } else { "0" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_wraps() {
        let mut sn = SeqNum::ZERO;
        sn.toggle();
        assert_eq!(sn, SeqNum::ONE);
        sn.toggle();
        assert_eq!(sn, SeqNum::ZERO);
        assert_eq!(SeqNum::ZERO.next(), SeqNum::ONE);
        assert_eq!(SeqNum::ONE.next(), SeqNum::ZERO);
    }
}
