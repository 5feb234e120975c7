//! Compact alphanumeric rendering of routing keys.

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u64 = 62;

/// Encode a value in base 62, most significant digit first.
pub fn encode_base62(mut value: u64) -> String {
    if value == 0 {
        return (ALPHABET[0] as char).to_string();
    }
    let mut digits = Vec::with_capacity(11);
    while value > 0 {
        digits.push(ALPHABET[(value % BASE) as usize]);
        value /= BASE;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Decode a base-62 string. Returns `None` on an empty string, a foreign
/// character, or overflow.
pub fn decode_base62(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    s.bytes().try_fold(0u64, |acc, b| {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'A'..=b'Z' => b - b'A' + 10,
            b'a'..=b'z' => b - b'a' + 36,
            _ => return None,
        };
        acc.checked_mul(BASE)?.checked_add(digit as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        assert_eq!(encode_base62(0), "0");
        assert_eq!(encode_base62(61), "z");
        assert_eq!(encode_base62(62), "10");
        assert_eq!(decode_base62("10"), Some(62));
    }

    #[test]
    fn test_extremes() {
        let s = encode_base62(u64::MAX);
        assert_eq!(s.len(), 11);
        assert_eq!(decode_base62(&s), Some(u64::MAX));
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(decode_base62(""), None);
        assert_eq!(decode_base62("ab-c"), None);
        assert_eq!(decode_base62("zzzzzzzzzzzz"), None);
    }
}
