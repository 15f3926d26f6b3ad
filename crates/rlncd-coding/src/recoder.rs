//! Block recoder: a decoder that re-emits random combinations of what it
//! has absorbed, without waiting for full rank.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::decoder::{BlockDecoder, FeedOutcome};
use crate::error::CodingError;
use crate::gf256;

/// Recoder for one generation.
///
/// Absorbs coded payloads exactly like [`BlockDecoder`] and produces fresh
/// payloads that are uniform-random combinations of the stored rows. The
/// output coefficient vectors are combinations of the stored vectors, so a
/// downstream decoder sees them as ordinary coded payloads.
pub struct BlockRecoder {
    decoder: BlockDecoder,
    rng: SmallRng,
}

impl BlockRecoder {
    pub fn new(generation_size: usize, symbol_size: usize) -> Self {
        Self::with_rng(generation_size, symbol_size, SmallRng::from_entropy())
    }

    /// Deterministic construction for tests.
    pub fn with_seed(generation_size: usize, symbol_size: usize, seed: u64) -> Self {
        Self::with_rng(generation_size, symbol_size, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(generation_size: usize, symbol_size: usize, rng: SmallRng) -> Self {
        Self {
            decoder: BlockDecoder::new(generation_size, symbol_size),
            rng,
        }
    }

    pub fn generation_size(&self) -> usize {
        self.decoder.generation_size()
    }

    pub fn symbol_size(&self) -> usize {
        self.decoder.symbol_size()
    }

    pub fn payload_size(&self) -> usize {
        self.decoder.payload_size()
    }

    pub fn rank(&self) -> usize {
        self.decoder.rank()
    }

    pub fn is_complete(&self) -> bool {
        self.decoder.is_complete()
    }

    pub fn is_partial_complete(&self) -> bool {
        self.decoder.is_partial_complete()
    }

    pub fn symbol_decoded(&self, index: usize) -> bool {
        self.decoder.symbol_decoded(index)
    }

    pub fn symbol(&self, index: usize) -> Option<&[u8]> {
        self.decoder.symbol(index)
    }

    /// Absorb one coded payload.
    pub fn feed(&mut self, payload: &[u8]) -> Result<FeedOutcome, CodingError> {
        self.decoder.feed(payload)
    }

    /// Write one recoded payload into `out` (`[coeffs][data]`).
    pub fn recode(&mut self, out: &mut [u8]) -> Result<(), CodingError> {
        if out.len() != self.payload_size() {
            return Err(CodingError::OutputLength {
                expected: self.payload_size(),
                actual: out.len(),
            });
        }

        let rows = self.decoder.rows();
        if rows.is_empty() {
            return Err(CodingError::Empty);
        }

        let (coeffs, data) = out.split_at_mut(self.decoder.generation_size());
        coeffs.fill(0);
        data.fill(0);

        // Random weight per stored row; redraw if every weight is zero.
        let mut weights = vec![0u8; rows.len()];
        loop {
            let mut nonzero = false;
            for w in weights.iter_mut() {
                *w = self.rng.gen();
                nonzero |= *w != 0;
            }
            if nonzero {
                break;
            }
        }

        for (row, &w) in rows.iter().zip(&weights) {
            gf256::axpy(coeffs, w, &row.coeffs);
            gf256::axpy(data, w, &row.data);
        }
        Ok(())
    }
}
