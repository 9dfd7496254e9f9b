use proptest::prelude::*;

use super::prime_field::{
    CanonicalSerialize, FieldDeserializeError, FieldElement, FieldElementOps,
};

#[test]
fn add_mul_inv_laws_ok() {
    let a = FieldElement::from(5u64);
    let b = FieldElement::from(7u64);

    assert_eq!(a.add(&b), FieldElement::from(12u64));
    assert_eq!(a.add(&a.neg()), FieldElement::ZERO);
    assert_eq!(a.mul(&b), FieldElement::from(35u64));

    let inv_b = b.inv().expect("inverse exists for non-zero element");
    assert_eq!(b.mul(&inv_b), FieldElement::ONE);
    assert!(FieldElement::ZERO.inv().is_none());
}

#[test]
fn wraps_at_modulus() {
    let max = FieldElement::from(FieldElement::MODULUS.value - 1);
    assert_eq!(max.add(&FieldElement::ONE), FieldElement::ZERO);
    assert_eq!(FieldElement::ZERO.sub(&FieldElement::ONE), max);
    assert_eq!(FieldElement::from(FieldElement::MODULUS.value), FieldElement::ZERO);
}

#[test]
fn serde_le_roundtrip_ok() {
    let element = FieldElement::from(42u64);
    let decoded = FieldElement::from_bytes(&element.to_bytes()).expect("canonical roundtrip");
    assert_eq!(decoded, element);
}

#[test]
fn reject_noncanonical_bytes_err() {
    let noncanonical = FieldElement::MODULUS.value.to_le_bytes();
    let err = FieldElement::from_bytes(&noncanonical)
        .expect_err("non-canonical representation should be rejected");
    assert_eq!(err, FieldDeserializeError::FieldDeserializeNonCanonical);
    assert_eq!(
        err.to_string(),
        "field element deserialization failed: non-canonical input"
    );
}

#[test]
fn pow_fermat_inverse_ok() {
    let element = FieldElement::from(19u64);
    let fermat_inverse = element.pow(FieldElement::MODULUS.value - 2);
    let inv = element.inv().expect("inverse exists for non-zero element");
    assert_eq!(fermat_inverse, inv);
}

#[test]
fn signed_lift_extremes() {
    assert_eq!(FieldElement::from_i64(-1).to_i64(), -1);
    assert_eq!(FieldElement::from_i64(i64::MAX).to_i64(), i64::MAX);
    assert_eq!(FieldElement::from_i64(-1), FieldElement::ONE.neg());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn signed_embedding_roundtrips(value in -(1i64 << 62)..(1i64 << 62)) {
        prop_assert_eq!(FieldElement::from_i64(value).to_i64(), value);
    }

    #[test]
    fn signed_arithmetic_matches_integers(a in -(1i64 << 30)..(1i64 << 30), b in -(1i64 << 30)..(1i64 << 30)) {
        let fa = FieldElement::from_i64(a);
        let fb = FieldElement::from_i64(b);
        prop_assert_eq!(fa.add(&fb).to_i64(), a + b);
        prop_assert_eq!(fa.sub(&fb).to_i64(), a - b);
        prop_assert_eq!(fa.mul(&fb).to_i64(), a * b);
    }
}
