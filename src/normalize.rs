//! Time-weighted resampling of a raw archive series onto a caller's normalized timestamp
//! grid (§4.9's Normalizer contract).

/// Resamples `(raw_timestamps, raw_values)`, each row ending at `raw_step`-second buckets
/// `(ts - raw_step, ts]`, onto `out_timestamps`'s `out_step`-second buckets.
///
/// Each output slot accumulates `value * overlap_seconds` over every raw bucket
/// intersecting its own bucket, then divides by the *fixed* `out_step` -- not by the
/// actual covered duration. A `NaN` raw value contributes nothing to the sum and does not
/// shrink the divisor, so a slot entirely covered by unknown raw data normalizes to `0.0`,
/// not `NaN`; only a slot with zero overlapping raw buckets at all yields `NaN`.
pub fn normalize(raw_timestamps: &[i64], raw_values: &[f64], raw_step: i64, out_timestamps: &[i64], out_step: i64) -> Vec<f64> {
    let mut out = vec![f64::NAN; out_timestamps.len()];

    for (j, &ots) in out_timestamps.iter().enumerate() {
        let out_lo = ots - out_step;
        let out_hi = ots;
        let mut sum = 0.0;
        let mut touched = false;

        for (&rts, &rv) in raw_timestamps.iter().zip(raw_values.iter()) {
            let raw_lo = rts - raw_step;
            let raw_hi = rts;
            let overlap = raw_hi.min(out_hi) - raw_lo.max(out_lo);
            if overlap <= 0 {
                continue;
            }
            touched = true;
            if !rv.is_nan() {
                sum += rv * (overlap as f64);
            }
        }

        if touched {
            out[j] = sum / (out_step as f64);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_grids_match() {
        let ts = vec![10, 20, 30];
        let vals = vec![1.0, 2.0, 3.0];
        let out = normalize(&ts, &vals, 10, &ts, 10);
        assert_eq!(out, vals);
    }

    #[test]
    fn coarsening_averages_two_raw_buckets() {
        let raw_ts = vec![10, 20];
        let raw_vals = vec![2.0, 4.0];
        let out_ts = vec![20];
        let out = normalize(&raw_ts, &raw_vals, 10, &out_ts, 20);
        assert!((out[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_raw_contributes_zero_not_nan() {
        let raw_ts = vec![10, 20];
        let raw_vals = vec![f64::NAN, 4.0];
        let out_ts = vec![20];
        let out = normalize(&raw_ts, &raw_vals, 10, &out_ts, 20);
        assert!((out[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn no_overlap_at_all_is_nan() {
        let raw_ts = vec![1000];
        let raw_vals = vec![5.0];
        let out_ts = vec![20];
        let out = normalize(&raw_ts, &raw_vals, 10, &out_ts, 10);
        assert!(out[0].is_nan());
    }
}
