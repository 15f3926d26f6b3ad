//! Block decoder: Gauss–Jordan elimination over coded payloads.

use crate::error::CodingError;
use crate::gf256;

/// Result of feeding one coded payload to a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The payload was linearly dependent on what was already held.
    NonInnovative,
    /// The payload increased the rank. `systematic` carries the symbol
    /// index when the incoming coefficient vector was a basis vector.
    Innovative { systematic: Option<usize> },
}

impl FeedOutcome {
    pub fn is_innovative(&self) -> bool {
        matches!(self, Self::Innovative { .. })
    }
}

pub(crate) struct Row {
    pub(crate) coeffs: Vec<u8>,
    pub(crate) data: Vec<u8>,
}

/// Decoder for one generation.
///
/// Rows are kept in reduced row-echelon form: every stored row is
/// normalized to a leading 1 and eliminated against every other pivot, so
/// a symbol is recovered exactly when its pivot row has a single nonzero
/// coefficient.
pub struct BlockDecoder {
    generation_size: usize,
    symbol_size: usize,
    rows: Vec<Row>,
    /// Column -> index into `rows` for the row holding that pivot.
    pivot_rows: Vec<Option<usize>>,
}

impl BlockDecoder {
    pub fn new(generation_size: usize, symbol_size: usize) -> Self {
        Self {
            generation_size,
            symbol_size,
            rows: Vec::with_capacity(generation_size),
            pivot_rows: vec![None; generation_size],
        }
    }

    pub fn generation_size(&self) -> usize {
        self.generation_size
    }

    pub fn symbol_size(&self) -> usize {
        self.symbol_size
    }

    pub fn payload_size(&self) -> usize {
        self.generation_size + self.symbol_size
    }

    /// Number of linearly independent payloads held.
    pub fn rank(&self) -> usize {
        self.rows.len()
    }

    pub fn is_complete(&self) -> bool {
        self.rank() == self.generation_size
    }

    /// Whether the first `rank` symbols are individually recovered.
    pub fn is_partial_complete(&self) -> bool {
        let rank = self.rank();
        rank > 0 && (0..rank).all(|i| self.symbol_decoded(i))
    }

    /// Whether symbol `index` has been fully recovered.
    pub fn symbol_decoded(&self, index: usize) -> bool {
        match self.pivot_rows.get(index).copied().flatten() {
            Some(row) => self.rows[row].coeffs.iter().filter(|&&c| c != 0).count() == 1,
            None => false,
        }
    }

    /// The recovered data for symbol `index`, if decoded.
    pub fn symbol(&self, index: usize) -> Option<&[u8]> {
        if !self.symbol_decoded(index) {
            return None;
        }
        self.pivot_rows[index].map(|row| self.rows[row].data.as_slice())
    }

    /// Absorb one coded payload (`[coeffs][data]`).
    pub fn feed(&mut self, payload: &[u8]) -> Result<FeedOutcome, CodingError> {
        if payload.len() != self.payload_size() {
            return Err(CodingError::PayloadLength {
                expected: self.payload_size(),
                actual: payload.len(),
            });
        }

        let mut coeffs = payload[..self.generation_size].to_vec();
        let mut data = payload[self.generation_size..].to_vec();

        let systematic = incoming_basis_index(&coeffs);

        // Forward-eliminate against every existing pivot.
        for col in 0..self.generation_size {
            let c = coeffs[col];
            if c == 0 {
                continue;
            }
            if let Some(row) = self.pivot_rows[col] {
                gf256::axpy(&mut coeffs, c, &self.rows[row].coeffs);
                gf256::axpy(&mut data, c, &self.rows[row].data);
            }
        }

        let pivot = match coeffs.iter().position(|&c| c != 0) {
            Some(p) => p,
            None => return Ok(FeedOutcome::NonInnovative),
        };

        // Normalize to a leading 1, then clear the new pivot column from
        // every stored row to stay in reduced form.
        let scale = gf256::inv(coeffs[pivot]);
        gf256::scale(&mut coeffs, scale);
        gf256::scale(&mut data, scale);

        for row in &mut self.rows {
            let c = row.coeffs[pivot];
            if c != 0 {
                gf256::axpy(&mut row.coeffs, c, &coeffs);
                gf256::axpy(&mut row.data, c, &data);
            }
        }

        self.rows.push(Row { coeffs, data });
        self.pivot_rows[pivot] = Some(self.rows.len() - 1);

        Ok(FeedOutcome::Innovative { systematic })
    }

    pub(crate) fn rows(&self) -> &[Row] {
        &self.rows
    }
}

/// The symbol index when `coeffs` is a standard basis vector.
fn incoming_basis_index(coeffs: &[u8]) -> Option<usize> {
    let mut index = None;
    for (i, &c) in coeffs.iter().enumerate() {
        match (c, index) {
            (0, _) => {}
            (1, None) => index = Some(i),
            _ => return None,
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::BlockEncoder;

    const G: usize = 4;
    const SYMBOL: usize = 8;

    fn source(i: usize) -> Vec<u8> {
        (0..SYMBOL).map(|b| (i * 16 + b) as u8 + 1).collect()
    }

    fn filled_encoder(seed: u64) -> BlockEncoder {
        let mut enc = BlockEncoder::with_seed(G, SYMBOL, seed);
        for i in 0..G {
            enc.set_symbol(i, &source(i)).unwrap();
        }
        enc
    }

    #[test]
    fn feed_rejects_wrong_length() {
        let mut dec = BlockDecoder::new(G, SYMBOL);
        assert!(matches!(
            dec.feed(&[0u8; G + SYMBOL - 1]),
            Err(CodingError::PayloadLength { .. })
        ));
    }

    #[test]
    fn systematic_roundtrip_bit_identical() {
        let mut enc = filled_encoder(3);
        let mut dec = BlockDecoder::new(G, SYMBOL);
        let mut payload = vec![0u8; enc.payload_size()];

        for i in 0..G {
            enc.encode(&mut payload).unwrap();
            let outcome = dec.feed(&payload).unwrap();
            assert_eq!(
                outcome,
                FeedOutcome::Innovative {
                    systematic: Some(i)
                }
            );
        }

        assert!(dec.is_complete());
        for i in 0..G {
            assert_eq!(dec.symbol(i).unwrap(), source(i).as_slice());
        }
    }

    #[test]
    fn coded_roundtrip_recovers_all_symbols() {
        let mut enc = filled_encoder(11);
        enc.set_systematic(false);
        let mut dec = BlockDecoder::new(G, SYMBOL);
        let mut payload = vec![0u8; enc.payload_size()];

        // Random GF(256) combinations are independent with overwhelming
        // probability; feed a few extra in case of a dependent draw.
        let mut fed = 0;
        while !dec.is_complete() && fed < G + 8 {
            enc.encode(&mut payload).unwrap();
            dec.feed(&payload).unwrap();
            fed += 1;
        }

        assert!(dec.is_complete());
        for i in 0..G {
            assert_eq!(dec.symbol(i).unwrap(), source(i).as_slice());
        }
    }

    #[test]
    fn duplicate_payload_is_non_innovative() {
        let mut enc = filled_encoder(5);
        let mut dec = BlockDecoder::new(G, SYMBOL);
        let mut payload = vec![0u8; enc.payload_size()];
        enc.encode(&mut payload).unwrap();

        assert!(dec.feed(&payload).unwrap().is_innovative());
        assert_eq!(dec.feed(&payload).unwrap(), FeedOutcome::NonInnovative);
        assert_eq!(dec.rank(), 1);
    }

    #[test]
    fn rank_never_exceeds_generation_size() {
        let mut enc = filled_encoder(13);
        enc.set_systematic(false);
        let mut dec = BlockDecoder::new(G, SYMBOL);
        let mut payload = vec![0u8; enc.payload_size()];
        for _ in 0..3 * G {
            enc.encode(&mut payload).unwrap();
            dec.feed(&payload).unwrap();
            assert!(dec.rank() <= G);
        }
        assert!(dec.is_complete());
    }

    #[test]
    fn partial_complete_tracks_decoded_prefix() {
        let mut enc = filled_encoder(7);
        let mut dec = BlockDecoder::new(G, SYMBOL);
        let mut payload = vec![0u8; enc.payload_size()];

        // Two systematic payloads decode symbols 0 and 1 outright.
        enc.encode(&mut payload).unwrap();
        dec.feed(&payload).unwrap();
        assert!(dec.is_partial_complete());
        assert!(dec.symbol_decoded(0));
        assert!(!dec.symbol_decoded(1));

        enc.encode(&mut payload).unwrap();
        dec.feed(&payload).unwrap();
        assert!(dec.is_partial_complete());
        assert!(dec.symbol_decoded(1));
        assert!(dec.symbol(2).is_none());
    }

    #[test]
    fn incoming_basis_detection() {
        assert_eq!(incoming_basis_index(&[0, 1, 0]), Some(1));
        assert_eq!(incoming_basis_index(&[1, 0, 0]), Some(0));
        assert_eq!(incoming_basis_index(&[0, 2, 0]), None);
        assert_eq!(incoming_basis_index(&[1, 1, 0]), None);
        assert_eq!(incoming_basis_index(&[0, 0, 0]), None);
    }

    #[test]
    fn empty_decoder_reports_nothing() {
        let dec = BlockDecoder::new(G, SYMBOL);
        assert_eq!(dec.rank(), 0);
        assert!(!dec.is_complete());
        assert!(!dec.is_partial_complete());
        assert!(dec.symbol(0).is_none());
    }
}
