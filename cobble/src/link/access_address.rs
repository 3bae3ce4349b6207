//! Access-address generation and validation.
//!
//! Every connection is identified by a 32-bit Access Address chosen by the initiator and doubling
//! as the radio sync word. The address has to look "sufficiently random" on air so that receivers
//! don't sync on bit patterns that occur in noise or in other fields; the Bluetooth specification
//! encodes that as a set of structural rules checked by [`is_valid`].
//!
//! The generator draws candidate words from the registered RNG until one passes validation. With
//! candidates drawn uniformly the rejection probability per draw is small, so termination is only
//! a probabilistic statement, but the expected number of draws is low single digits.

use crate::link::advertising;
use rand_core::RngCore;

/// Returns whether `aa` is acceptable as a connection Access Address.
///
/// The rules, per *Link Layer Specification, 2.1.2*:
/// * it must differ from the advertising access address,
/// * it must not contain a run of 7 or more identical bits,
/// * it must have at least 3 bit transitions,
/// * it must have at least 2 bit transitions in its most significant 6 bits.
pub fn is_valid(aa: u32) -> bool {
    aa != advertising::ACCESS_ADDRESS
        && longest_bit_run(aa) < 7
        && transitions(aa) >= 3
        && msb6_transitions(aa) >= 2
}

/// Generates a fresh Access Address, drawing from `rng` until validation passes.
pub fn generate(rng: &mut impl RngCore) -> u32 {
    loop {
        let candidate = rng.next_u32();
        if is_valid(candidate) {
            return candidate;
        }
        trace!("rejected access address candidate {:08x}", candidate);
    }
}

/// Length of the longest run of identical consecutive bits in `value`.
fn longest_bit_run(value: u32) -> u32 {
    let mut longest = 1;
    let mut current = 1;
    for i in 1..32 {
        if (value >> i) & 1 == (value >> (i - 1)) & 1 {
            current += 1;
            if current > longest {
                longest = current;
            }
        } else {
            current = 1;
        }
    }
    longest
}

/// Number of adjacent-bit transitions in the full 32-bit value.
fn transitions(value: u32) -> u32 {
    (value ^ (value >> 1)).count_ones() - ((value >> 31) & 1)
}

/// Number of adjacent-bit transitions within the 6 most significant bits.
fn msb6_transitions(value: u32) -> u32 {
    let msb6 = value >> 26;
    ((msb6 ^ (msb6 >> 1)) & 0b11111).count_ones()
}

/// A 32-bit Galois LFSR usable as the stack's random source.
///
/// Feedback taps at bits 32, 22, 2 and 1 give a maximal-length sequence. The state must never be
/// zero; a zero seed is coerced to 1.
///
/// None of the material generated from this (access addresses, CRC initialization values, device
/// addresses) is security-relevant, so a deterministic generator seeded from whatever entropy the
/// platform has lying around (RC oscillator jitter, boot counter) is fine.
pub struct Lfsr(u32);

const LFSR_TAPS: u32 = 0x8020_0003;

impl Lfsr {
    /// Creates an LFSR from a seed.
    pub fn new(seed: u32) -> Self {
        Lfsr(if seed == 0 { 1 } else { seed })
    }

    fn step(&mut self) {
        let lsb = self.0 & 1;
        self.0 >>= 1;
        if lsb != 0 {
            self.0 ^= LFSR_TAPS;
        }
    }
}

impl RngCore for Lfsr {
    fn next_u32(&mut self) -> u32 {
        for _ in 0..32 {
            self.step();
        }
        self.0
    }

    fn next_u64(&mut self) -> u64 {
        u64::from(self.next_u32()) | (u64::from(self.next_u32()) << 32)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            let word = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
