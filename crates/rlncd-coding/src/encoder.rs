//! Block encoder: source-symbol storage plus coded payload generation.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::error::CodingError;
use crate::gf256;

/// Encoder for one generation of `g` symbols.
///
/// Symbols are written into fixed slots with [`set_symbol`](Self::set_symbol);
/// the rank equals the number of slots filled so far. While systematic mode
/// is on, [`encode`](Self::encode) emits each stored symbol once as a basis
/// payload before switching to uniform-random combinations of everything
/// stored.
pub struct BlockEncoder {
    generation_size: usize,
    symbol_size: usize,
    /// `generation_size` slots of `symbol_size` bytes each.
    storage: Vec<u8>,
    added: usize,
    systematic: bool,
    systematic_sent: usize,
    rng: SmallRng,
}

impl BlockEncoder {
    pub fn new(generation_size: usize, symbol_size: usize) -> Self {
        Self::with_rng(generation_size, symbol_size, SmallRng::from_entropy())
    }

    /// Deterministic construction for tests and reproducible runs.
    pub fn with_seed(generation_size: usize, symbol_size: usize, seed: u64) -> Self {
        Self::with_rng(generation_size, symbol_size, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(generation_size: usize, symbol_size: usize, rng: SmallRng) -> Self {
        Self {
            generation_size,
            symbol_size,
            storage: vec![0u8; generation_size * symbol_size],
            added: 0,
            systematic: true,
            systematic_sent: 0,
            rng,
        }
    }

    pub fn generation_size(&self) -> usize {
        self.generation_size
    }

    pub fn symbol_size(&self) -> usize {
        self.symbol_size
    }

    /// Coded payload size: coefficient vector plus one symbol.
    pub fn payload_size(&self) -> usize {
        self.generation_size + self.symbol_size
    }

    /// Number of symbols stored; for an encoder this is also the rank.
    pub fn rank(&self) -> usize {
        self.added
    }

    pub fn is_full(&self) -> bool {
        self.added >= self.generation_size
    }

    pub fn set_systematic(&mut self, on: bool) {
        self.systematic = on;
    }

    /// Store symbol `index`. Shorter data is zero-padded to the symbol size.
    pub fn set_symbol(&mut self, index: usize, data: &[u8]) -> Result<(), CodingError> {
        if index >= self.generation_size {
            return Err(CodingError::SymbolIndex {
                index,
                generation_size: self.generation_size,
            });
        }
        if data.len() > self.symbol_size {
            return Err(CodingError::SymbolTooLong {
                len: data.len(),
                max: self.symbol_size,
            });
        }

        let slot = &mut self.storage[index * self.symbol_size..(index + 1) * self.symbol_size];
        slot[..data.len()].copy_from_slice(data);
        slot[data.len()..].fill(0);
        self.added = self.added.max(index + 1);
        Ok(())
    }

    fn symbol(&self, index: usize) -> &[u8] {
        &self.storage[index * self.symbol_size..(index + 1) * self.symbol_size]
    }

    /// Write one coded payload into `out` (`[coeffs][data]`).
    pub fn encode(&mut self, out: &mut [u8]) -> Result<(), CodingError> {
        if out.len() != self.payload_size() {
            return Err(CodingError::OutputLength {
                expected: self.payload_size(),
                actual: out.len(),
            });
        }
        if self.added == 0 {
            return Err(CodingError::Empty);
        }

        let (coeffs, data) = out.split_at_mut(self.generation_size);
        coeffs.fill(0);
        data.fill(0);

        if self.systematic && self.systematic_sent < self.added {
            let index = self.systematic_sent;
            coeffs[index] = 1;
            data.copy_from_slice(self.symbol(index));
            self.systematic_sent += 1;
            return Ok(());
        }

        // Uniform-random combination over the stored symbols; redraw the
        // all-zero vector so every payload carries information.
        loop {
            let mut nonzero = false;
            for c in coeffs[..self.added].iter_mut() {
                *c = self.rng.gen();
                nonzero |= *c != 0;
            }
            if nonzero {
                break;
            }
        }

        for (index, &c) in coeffs[..self.added].iter().enumerate() {
            gf256::axpy(data, c, self.symbol(index));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(g: usize, symbol_size: usize) -> BlockEncoder {
        let mut enc = BlockEncoder::with_seed(g, symbol_size, 7);
        for i in 0..g {
            let data = vec![i as u8 + 1; symbol_size];
            enc.set_symbol(i, &data).unwrap();
        }
        enc
    }

    #[test]
    fn rank_tracks_symbols_added() {
        let mut enc = BlockEncoder::with_seed(4, 8, 1);
        assert_eq!(enc.rank(), 0);
        enc.set_symbol(0, &[1]).unwrap();
        assert_eq!(enc.rank(), 1);
        enc.set_symbol(1, &[2]).unwrap();
        assert_eq!(enc.rank(), 2);
        assert!(!enc.is_full());
        enc.set_symbol(2, &[3]).unwrap();
        enc.set_symbol(3, &[4]).unwrap();
        assert!(enc.is_full());
    }

    #[test]
    fn set_symbol_pads_with_zeros() {
        let mut enc = BlockEncoder::with_seed(2, 4, 1);
        enc.set_symbol(0, &[0xAB, 0xCD]).unwrap();
        assert_eq!(enc.symbol(0), &[0xAB, 0xCD, 0, 0]);
    }

    #[test]
    fn set_symbol_bounds() {
        let mut enc = BlockEncoder::with_seed(2, 4, 1);
        assert!(matches!(
            enc.set_symbol(2, &[1]),
            Err(CodingError::SymbolIndex { .. })
        ));
        assert!(matches!(
            enc.set_symbol(0, &[0; 5]),
            Err(CodingError::SymbolTooLong { .. })
        ));
    }

    #[test]
    fn systematic_payloads_come_first() {
        let mut enc = filled(3, 4);
        let mut payload = vec![0u8; enc.payload_size()];
        for i in 0..3 {
            enc.encode(&mut payload).unwrap();
            let mut expected_coeffs = vec![0u8; 3];
            expected_coeffs[i] = 1;
            assert_eq!(&payload[..3], expected_coeffs.as_slice());
            assert_eq!(&payload[3..], vec![i as u8 + 1; 4].as_slice());
        }
        // Fourth payload is a random combination, not a basis vector.
        enc.encode(&mut payload).unwrap();
        assert!(payload[..3].iter().any(|&c| c != 0));
    }

    #[test]
    fn systematic_off_emits_combinations_immediately() {
        let mut enc = filled(3, 4);
        enc.set_systematic(false);
        let mut payload = vec![0u8; enc.payload_size()];
        enc.encode(&mut payload).unwrap();
        assert!(payload[..3].iter().any(|&c| c != 0));
    }

    #[test]
    fn encode_empty_generation_fails() {
        let mut enc = BlockEncoder::with_seed(2, 4, 1);
        let mut payload = vec![0u8; enc.payload_size()];
        assert!(matches!(enc.encode(&mut payload), Err(CodingError::Empty)));
    }

    #[test]
    fn encode_checks_output_length() {
        let mut enc = filled(2, 4);
        let mut short = vec![0u8; 3];
        assert!(matches!(
            enc.encode(&mut short),
            Err(CodingError::OutputLength { .. })
        ));
    }

    #[test]
    fn partial_generation_combinations_only_touch_added() {
        let mut enc = BlockEncoder::with_seed(4, 4, 9);
        enc.set_systematic(false);
        enc.set_symbol(0, &[1; 4]).unwrap();
        enc.set_symbol(1, &[2; 4]).unwrap();
        let mut payload = vec![0u8; enc.payload_size()];
        enc.encode(&mut payload).unwrap();
        assert_eq!(payload[2], 0);
        assert_eq!(payload[3], 0);
    }
}
