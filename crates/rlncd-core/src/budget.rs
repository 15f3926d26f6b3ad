//! Credit and budget arithmetic.
//!
//! Pure functions converting `(g, e1, e2, e3)` into the redundancy factor
//! `r` and the per-role packet budgets. Estimates are bytes in `[0, ONE]`
//! with `ONE = 255`: `e1` is source→helper loss, `e2` helper→destination,
//! `e3` source→destination. Every function here is deterministic and the
//! integer evaluation order (ceiling rounding included) is load-bearing,
//! because the results are compared against integer packet counters.
//!
//! An estimate of `ONE` or `ONE - 1` means the link sample is missing and
//! selects a deterministic fallback.

use crate::constants::{ESTIMATE_MISSING, ONE};

/// Ceiling division: `ceil(nom / denom)`.
pub fn ceil_div(nom: u64, denom: u64) -> u64 {
    nom / denom + u64::from(nom % denom != 0)
}

fn any_missing(e1: u8, e2: u8, e3: u8) -> bool {
    u64::from(e1) >= ESTIMATE_MISSING
        || u64::from(e2) >= ESTIMATE_MISSING
        || u64::from(e3) >= ESTIMATE_MISSING
}

/// Selects between the two branches of the `r` formula.
pub fn r_test(e1: u8, e2: u8, e3: u8) -> bool {
    let (e1, e2, e3) = (u64::from(e1), u64::from(e2), u64::from(e3));
    (ONE - e2) < (e3 - e1 * e3 / ONE)
}

/// Redundancy factor `r`: how many extra transmissions one lost packet
/// costs on this three-link triangle.
pub fn r_val(g: u64, e1: u8, e2: u8, e3: u8) -> u64 {
    let (e1, e2, e3) = (i64::from(e1), i64::from(e2), i64::from(e3));
    let one = ONE as i64;

    if r_test(e1 as u8, e2 as u8, e3 as u8) {
        let denom = (e3 - e1 * e3 / one).max(1);
        ceil_div(ONE, denom as u64)
    } else {
        let g = g as i64;
        let nom = (one * g - g * e2 - g * e3 + g * e1 * e3 / one).max(0);
        let denom = (one + e1 * e3 * e2 / one / one - e2 - e1 * e3 / one).max(1);
        ceil_div(nom as u64, denom as u64)
    }
}

/// Packet budget for a source encoder.
///
/// Stays fractional: emission loops compare integer counters against this
/// value, so a budget of `4.24` permits a fifth packet.
pub fn source_budget(g: u64, e1: u8, e2: u8, e3: u8, overshoot: f64) -> f64 {
    if u64::from(e3) >= ESTIMATE_MISSING {
        return overshoot * g as f64;
    }

    let r = r_val(g, e1, e2, e3);
    let nom = (g * ONE + r * ONE - r * u64::from(e2)) as f64;
    let denom = (2 * ONE as i64 - i64::from(e3) - i64::from(e2)).max(1) as f64;

    overshoot * nom / denom
}

/// Packet budget for a multi-hop recoder (ceiling).
pub fn recoder_budget(g: u64, e1: u8, e2: u8, e3: u8) -> u64 {
    let r = r_val(g, e1, e2, e3);
    let nom = g * ONE + r * ONE - r * u64::from(e2);
    let denom = (2 * ONE as i64 - i64::from(e3) - i64::from(e2)).max(1);

    ceil_div(nom, denom as u64)
}

/// Per-packet budget increment for a recoder (and for an encoder fed above
/// its threshold).
pub fn recoder_credit(e1: u8, e2: u8, e3: u8) -> f64 {
    let _ = e2;
    let denom = (ONE as i64 - i64::from(e3) * i64::from(e1) / ONE as i64).max(1);
    ONE as f64 / denom as f64
}

/// Maximum number of help packets a one-hop helper may emit.
pub fn helper_max_budget(g: u64, e1: u8, e2: u8, e3: u8, overshoot: f64) -> u64 {
    if any_missing(e1, e2, e3) {
        return g / 2;
    }

    let r = r_val(g, e1, e2, e3) as i64;
    let one = ONE as i64;
    let nom = (i64::from(e3) * r - r * one + g as i64 * one).max(0) as u64;
    let denom = (2 * one - i64::from(e3) - i64::from(e2)).max(1) as u64;

    (overshoot * nom as f64 / denom as f64) as u64 + u64::from(nom % denom != 0)
}

/// Rank a helper must overhear before it starts recoding.
pub fn helper_threshold(g: u64, e1: u8, e2: u8, e3: u8, ratio: f64) -> u64 {
    if any_missing(e1, e2, e3) {
        return g / 2;
    }

    let r = r_val(g, e1, e2, e3);
    ((r - r * u64::from(e1) / ONE) as f64 * ratio) as u64
}

/// Per-packet budget increment for a helper.
pub fn helper_credit(e1: u8, e2: u8, e3: u8) -> f64 {
    if any_missing(e1, e2, e3) {
        return 1.0;
    }

    ONE as f64 / (ONE - u64::from(e1)) as f64
}
