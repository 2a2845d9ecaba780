//! Fixed-width byte records and their big-integer chunk encoding.
//!
//! A [`Slot`] is the unit of storage: a byte string of fixed width `B`.
//! Secret-shared scans accumulate slots with in-place XOR; encrypted scans
//! view a slot as an ordered sequence of big integers, each packing up to
//! `K` bytes big-endian, where `K` is the per-ciphertext payload capacity
//! of the encryption key in use. The two views are bijective, so a slot
//! survives a round trip through either representation unchanged.

use rand::Rng;
use rug::{integer::Order, Integer};
use serde::{Deserialize, Serialize};

use crate::error::{PirError, Result};

/// A fixed-width byte record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub data: Vec<u8>,
}

impl Slot {
    /// All-zero slot of the given width.
    pub fn empty(num_bytes: usize) -> Self {
        Self {
            data: vec![0u8; num_bytes],
        }
    }

    /// Uniformly random slot of the given width.
    pub fn random(num_bytes: usize, rng: &mut impl Rng) -> Self {
        let mut data = vec![0u8; num_bytes];
        rng.fill(&mut data[..]);
        Self { data }
    }

    /// Width in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True when every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }

    /// In-place XOR with another slot of equal width.
    pub fn xor_with(&mut self, other: &Slot) -> Result<()> {
        if self.data.len() != other.data.len() {
            return Err(PirError::ShapeMismatch(format!(
                "cannot xor slots of widths {} and {}",
                self.data.len(),
                other.data.len()
            )));
        }
        for (dst, src) in self.data.iter_mut().zip(other.data.iter()) {
            *dst ^= src;
        }
        Ok(())
    }

    /// The whole slot as one big-endian integer.
    ///
    /// Capability keys are compared under this encoding, so the key
    /// database and the client token construction must both use it.
    pub fn as_integer(&self) -> Integer {
        Integer::from_digits(&self.data, Order::MsfBe)
    }

    /// Split into `⌈B / chunk_bytes⌉` big integers, each covering up to
    /// `chunk_bytes` bytes of the slot, big-endian. The final integer
    /// covers whatever remains.
    pub fn to_chunks(&self, chunk_bytes: usize) -> Vec<Integer> {
        assert!(chunk_bytes > 0, "chunk width must be positive");
        self.data
            .chunks(chunk_bytes)
            .map(|bytes| Integer::from_digits(bytes, Order::MsfBe))
            .collect()
    }

    /// Inverse of [`Slot::to_chunks`]: reassemble a slot of width
    /// `num_bytes` from chunk integers.
    pub fn from_chunks(chunks: &[Integer], num_bytes: usize, chunk_bytes: usize) -> Result<Slot> {
        assert!(chunk_bytes > 0, "chunk width must be positive");
        if chunks.len() != num_bytes.div_ceil(chunk_bytes) {
            return Err(PirError::ShapeMismatch(format!(
                "{} chunks cannot fill a {}-byte slot at {} bytes per chunk",
                chunks.len(),
                num_bytes,
                chunk_bytes
            )));
        }

        let mut data = Vec::with_capacity(num_bytes);
        for (i, chunk) in chunks.iter().enumerate() {
            let width = usize::min(chunk_bytes, num_bytes - i * chunk_bytes);
            let bytes = chunk.to_digits::<u8>(Order::MsfBe);
            if bytes.len() > width {
                return Err(PirError::ShapeMismatch(format!(
                    "chunk {} holds {} bytes but only {} fit",
                    i,
                    bytes.len(),
                    width
                )));
            }
            // left-pad: to_digits drops leading zeros
            data.extend(std::iter::repeat(0u8).take(width - bytes.len()));
            data.extend_from_slice(&bytes);
        }

        Ok(Slot { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_is_involutive() {
        let mut rng = rand::rng();
        let a = Slot::random(32, &mut rng);
        let b = Slot::random(32, &mut rng);

        let mut acc = a.clone();
        acc.xor_with(&b).unwrap();
        acc.xor_with(&b).unwrap();
        assert_eq!(acc, a);
    }

    #[test]
    fn test_xor_width_mismatch_fails() {
        let mut a = Slot::empty(4);
        let b = Slot::empty(5);
        assert!(a.xor_with(&b).is_err());
    }

    #[test]
    fn test_empty_slot_is_zero() {
        assert!(Slot::empty(16).is_zero());
    }

    #[test]
    fn test_chunk_round_trip() {
        let mut rng = rand::rng();
        for (num_bytes, chunk_bytes) in [(32, 15), (32, 32), (1, 15), (7, 3), (16, 1)] {
            let slot = Slot::random(num_bytes, &mut rng);
            let chunks = slot.to_chunks(chunk_bytes);
            assert_eq!(chunks.len(), num_bytes.div_ceil(chunk_bytes));
            let back = Slot::from_chunks(&chunks, num_bytes, chunk_bytes).unwrap();
            assert_eq!(back, slot, "round trip failed for B={num_bytes} K={chunk_bytes}");
        }
    }

    #[test]
    fn test_chunks_preserve_leading_zeros() {
        let slot = Slot {
            data: vec![0, 0, 1, 0, 0, 2],
        };
        let chunks = slot.to_chunks(3);
        let back = Slot::from_chunks(&chunks, 6, 3).unwrap();
        assert_eq!(back, slot);
    }

    #[test]
    fn test_from_chunks_rejects_wrong_count() {
        let chunks = vec![Integer::from(1)];
        assert!(Slot::from_chunks(&chunks, 32, 15).is_err());
    }

    #[test]
    fn test_as_integer_is_big_endian() {
        let slot = Slot {
            data: vec![0x01, 0x00],
        };
        assert_eq!(slot.as_integer(), Integer::from(256));
    }
}
