//! Fixed-point quantization.
//!
//! Real values are scaled by `2^s` and rounded half-to-even; in-graph
//! rescaling divides by `2^s` with floor semantics (arithmetic shift). The
//! inference adapter and the circuit use exactly these two rules.

use thiserror::Error;

use crate::config::QuantizationConfig;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantizationError {
    #[error("value at index {index} is not finite")]
    NonFinite { index: usize },
    #[error("value at index {index} quantizes to {value}, outside the signed {bits}-bit range")]
    OutOfRange { index: usize, value: i64, bits: u32 },
}

/// `round_half_even(value * 2^scale_bits)`, saturating at the i64 bounds.
pub fn quantize(value: f64, scale_bits: u32) -> i64 {
    (value * (1u64 << scale_bits) as f64).round_ties_even() as i64
}

pub fn dequantize(value: i64, scale_bits: u32) -> f64 {
    value as f64 / (1u64 << scale_bits) as f64
}

/// Floor division by `2^shift`.
pub fn rescale(value: i64, shift: u32) -> i64 {
    value >> shift
}

/// Quantizes model inputs and checks they fit `input_bits`.
pub fn quantize_input(values: &[f64], quant: &QuantizationConfig) -> Result<Vec<i64>, QuantizationError> {
    let bound = 1i64 << (quant.input_bits - 1);
    values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            if !value.is_finite() {
                return Err(QuantizationError::NonFinite { index });
            }
            let q = quantize(*value, quant.scale_bits);
            if q < -bound || q >= bound {
                return Err(QuantizationError::OutOfRange {
                    index,
                    value: q,
                    bits: quant.input_bits,
                });
            }
            Ok(q)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ties_round_to_even() {
        // 0.5 / 128 sits exactly between two grid points.
        assert_eq!(quantize(0.5 / 128.0, 7), 0);
        assert_eq!(quantize(1.5 / 128.0, 7), 2);
        assert_eq!(quantize(2.5 / 128.0, 7), 2);
        assert_eq!(quantize(-2.5 / 128.0, 7), -2);
        assert_eq!(quantize(-3.5 / 128.0, 7), -4);
    }

    #[test]
    fn rescale_floors_negative_values() {
        assert_eq!(rescale(255, 7), 1);
        assert_eq!(rescale(-1, 7), -1);
        assert_eq!(rescale(-128, 7), -1);
        assert_eq!(rescale(-129, 7), -2);
    }

    #[test]
    fn input_range_is_enforced() {
        let quant = QuantizationConfig {
            scale_bits: 7,
            input_bits: 8,
            range_bits: 32,
        };
        assert_eq!(quantize_input(&[0.5, -1.0], &quant).unwrap(), vec![64, -128]);
        assert_eq!(
            quantize_input(&[1.0], &quant).unwrap_err(),
            QuantizationError::OutOfRange {
                index: 0,
                value: 128,
                bits: 8
            }
        );
        assert_eq!(
            quantize_input(&[f64::NAN], &quant).unwrap_err(),
            QuantizationError::NonFinite { index: 0 }
        );
    }

    proptest! {
        #[test]
        fn quantization_error_is_at_most_half_a_step(value in -100.0f64..100.0) {
            let q = quantize(value, 7);
            prop_assert!((dequantize(q, 7) - value).abs() <= 0.5 / 128.0 + f64::EPSILON);
        }

        #[test]
        fn rescale_matches_floor_division(value in -(1i64 << 40)..(1i64 << 40), shift in 1u32..20) {
            let expected = (value as f64 / (1u64 << shift) as f64).floor() as i64;
            prop_assert_eq!(rescale(value, shift), expected);
        }
    }
}
