//! Rolling-hash checksum for exported glossary snapshots.
//!
//! The hash walks UTF-16 code units with `h = h * 31 + unit` in wrapping
//! 32-bit arithmetic and renders `|h|` as lowercase hex. Browser clients
//! compute the same value, so the encoding must not change.

use serde::Serialize;

pub fn rolling_hash(input: &str) -> String {
    let hash = input
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32));
    format!("{:x}", hash.unsigned_abs())
}

/// Checksum of the compact JSON encoding of `value`.
pub fn checksum_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(rolling_hash(&serde_json::to_string(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_values() {
        assert_eq!(rolling_hash(""), "0");
        // 'a' = 97
        assert_eq!(rolling_hash("a"), "61");
        // 97 * 31 + 98 = 3105
        assert_eq!(rolling_hash("ab"), "c21");
        assert_eq!(rolling_hash("hello"), "5e918d2");
    }

    #[test]
    fn test_overflow_wraps_like_32_bit() {
        // Long enough to wrap many times; must not panic and must stay within u32 hex.
        let hash = rolling_hash(&"Moving Head Beam Light ".repeat(100));
        assert!(hash.len() <= 8);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_utf16_units_not_bytes() {
        // 'ç' is one UTF-16 unit (0xE7) but two UTF-8 bytes.
        assert_eq!(rolling_hash("ç"), "e7");
    }

    #[test]
    fn test_checksum_json_is_order_sensitive() {
        let a = checksum_json(&["Truss", "Dimmer"]).unwrap();
        let b = checksum_json(&["Dimmer", "Truss"]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, rolling_hash(r#"["Truss","Dimmer"]"#));
    }

    proptest! {
        #[test]
        fn prop_matches_reference_arithmetic(s in "\\PC{0,64}") {
            let mut reference: i64 = 0;
            for unit in s.encode_utf16() {
                reference = (reference * 31 + unit as i64) & 0xFFFF_FFFF;
            }
            let signed = reference as u32 as i32;
            prop_assert_eq!(rolling_hash(&s), format!("{:x}", signed.unsigned_abs()));
        }

        #[test]
        fn prop_single_char_change_changes_hash(s in "[a-z]{1,32}", idx in 0usize..32) {
            let idx = idx % s.len();
            let mut bytes = s.clone().into_bytes();
            bytes[idx] = if bytes[idx] == b'z' { b'a' } else { bytes[idx] + 1 };
            let changed = String::from_utf8(bytes).unwrap();
            prop_assert_ne!(rolling_hash(&s), rolling_hash(&changed));
        }
    }
}
