//! Random identifiers for one-time artifacts.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Length of authorization codes and device codes.
pub const CODE_LENGTH: usize = 32;

/// Length of human-entered user codes.
pub const USER_CODE_LENGTH: usize = 8;

/// Uppercase letters and digits without look-alikes (0/O, 1/I/L, 5/S, 8/B, 2/Z).
const USER_CODE_ALPHABET: &[char] = &[
    'A', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K', 'M', 'N', 'P', 'Q', 'R', 'T', 'U', 'V', 'W',
    'X', 'Y', '3', '4', '6', '7', '9',
];

/// A random alphanumeric string of `len` characters.
#[must_use]
pub fn alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A random user code for manual entry.
#[must_use]
pub fn user_code() -> String {
    let mut rng = rand::thread_rng();
    (0..USER_CODE_LENGTH)
        .map(|_| USER_CODE_ALPHABET[rng.gen_range(0..USER_CODE_ALPHABET.len())])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphanumeric() {
        let code = alphanumeric(CODE_LENGTH);
        assert_eq!(code.len(), 32);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(code, alphanumeric(CODE_LENGTH));
    }

    #[test]
    fn test_user_code_alphabet() {
        for _ in 0..64 {
            let code = user_code();
            assert_eq!(code.len(), USER_CODE_LENGTH);
            assert!(code.chars().all(|c| USER_CODE_ALPHABET.contains(&c)));
            assert!(!code.contains(['0', 'O', '1', 'I', 'L']));
        }
    }
}
