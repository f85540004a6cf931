//! Stable digests of analysis parameters and results.
//!
//! A value is digested by streaming its compact serde_json encoding into an
//! xxh64 state. Only ordered containers and integers reach the encoder:
//! floats are turned into integer steps with [`quantize`] first, so a cutoff
//! of `4.0` and one of `4.0 + 1e-12` produce the same digest on every
//! platform.

use serde::Serialize;
use std::io;
use xxhash_rust::xxh64::Xxh64;

/// Integer steps per unit when quantizing floats (1e-6 resolution).
pub const FLOAT_QUANTIZATION_FACTOR: f64 = 1_000_000.0;

/// Sink feeding serialized bytes into a running xxh64 state.
struct DigestWriter(Xxh64);

impl io::Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// xxh64 digest (seed 0) of the JSON encoding of `value`.
///
/// # Panics
///
/// If `value` has a map keyed by something other than strings or integers.
/// Digested types in this crate never do.
pub fn digest<T: Serialize + ?Sized>(value: &T) -> u64 {
    let mut writer = DigestWriter(Xxh64::new(0));
    serde_json::to_writer(&mut writer, value).expect("digested values use string or integer map keys");
    writer.0.digest()
}

/// [`digest`] as 16 lowercase hex digits.
pub fn digest_hex<T: Serialize + ?Sized>(value: &T) -> String {
    format!("{:016x}", digest(value))
}

/// Round `value` to an integer count of 1e-6 steps.
pub fn quantize(value: f64) -> i64 {
    (value * FLOAT_QUANTIZATION_FACTOR).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use xxhash_rust::xxh64::xxh64;

    #[test]
    fn test_streamed_digest_matches_buffered_hash() {
        let tortuosity = BTreeMap::from([(0usize, 3u32), (4, 1), (2, 9)]);
        let bytes = serde_json::to_vec(&tortuosity).unwrap();
        assert_eq!(digest(&tortuosity), xxh64(&bytes, 0));
    }

    #[test]
    fn test_site_sets_digest_independent_of_insertion_order() {
        let a: BTreeSet<usize> = [3, 1, 2].into_iter().collect();
        let b: BTreeSet<usize> = [2, 3, 1].into_iter().collect();
        assert_eq!(digest(&("Li", &a)), digest(&("Li", &b)));
        assert_ne!(digest(&("Li", &a)), digest(&("Na", &a)));
    }

    #[test]
    fn test_hex_is_zero_padded() {
        let hex = digest_hex(&[0u8; 0]);
        assert_eq!(hex.len(), 16);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_quantize_absorbs_float_noise() {
        assert_eq!(quantize(4.0), 4_000_000);
        assert_eq!(quantize(4.0), quantize(4.0 + 1e-12));
        assert_ne!(quantize(4.0), quantize(3.5));
    }
}
