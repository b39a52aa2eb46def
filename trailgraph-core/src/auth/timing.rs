//! Constant-time comparisons
//!
//! Credential and digest comparisons go through these helpers so that the
//! time taken does not depend on where two inputs first differ.

use subtle::ConstantTimeEq;

/// Constant-time byte comparison. Length mismatch is unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq() {
        let a = [1u8; 32];
        let b = [2u8; 32];
        assert!(constant_time_eq(&a, &[1u8; 32]));
        assert!(!constant_time_eq(&a, &b));
        assert!(!constant_time_eq(&a, &a[..31]));
        assert!(constant_time_eq(&[], &[]));
    }
}
