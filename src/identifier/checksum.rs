//! RUC check digit (modulo 11 with positional weights)

/// Positional weights applied to the 10-digit base
const WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];

/// Length of the base the check digit is computed over
pub const BASE_LEN: usize = 10;

/// Compute the check digit for a 10-digit base.
///
/// `base` must be exactly ten ASCII digits; callers validate length and
/// digit-ness first. Anything else is a programming error and panics.
pub fn checksum(base: &str) -> u8 {
    let bytes = base.as_bytes();
    assert!(
        bytes.len() == BASE_LEN && bytes.iter().all(u8::is_ascii_digit),
        "checksum base must be {} ASCII digits, got {:?}",
        BASE_LEN,
        base
    );

    let sum: u32 = bytes
        .iter()
        .zip(WEIGHTS.iter())
        .map(|(digit, weight)| u32::from(digit - b'0') * weight)
        .sum();

    match 11 - sum % 11 {
        10 => 0,
        11 => 1,
        diff => diff as u8,
    }
}

/// Check digit as its ASCII character
pub fn checksum_char(base: &str) -> char {
    char::from(b'0' + checksum(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_check_digits() {
        // 1*5 + 0*4 + 1*3 + 2*2 + 3*7 + 4*6 + 5*5 + 6*4 + 7*3 + 8*2 = 143, 143 % 11 = 0
        assert_eq!(checksum("1012345678"), 1);
        assert_eq!(checksum("2012345678"), 6);
        assert_eq!(checksum_char("1012345678"), '1');
    }

    #[test]
    fn test_remainder_edge_cases() {
        // remainder 0 -> diff 11 -> 1
        assert_eq!(checksum("0000000000"), 1);
        // remainder 1 -> diff 10 -> 0 (sum of 1*5 + 0... + 1*7 + ... = 12)
        assert_eq!(checksum("1000100000"), 0);
    }

    #[test]
    fn test_every_base_yields_single_digit() {
        for n in (0u64..10_000_000_000).step_by(7_919_311) {
            let base = format!("{:010}", n);
            let digit = checksum(&base);
            assert!(digit <= 9);
            assert_eq!(digit, checksum(&base));
        }
    }

    #[test]
    #[should_panic]
    fn test_rejects_short_base() {
        checksum("123");
    }

    #[test]
    #[should_panic]
    fn test_rejects_non_digit_base() {
        checksum("10123456a8");
    }
}
