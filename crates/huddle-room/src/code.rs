//! Random room codes.

use huddle_protocol::RoomCode;
use rand::Rng;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ1234567890";

/// Generates a random code of `length` characters from `A-Z0-9`.
pub(crate) fn random_code(length: usize) -> RoomCode {
    let mut rng = rand::rng();
    let code: String = (0..length)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    RoomCode::new(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_code_has_requested_length_and_alphabet() {
        for _ in 0..100 {
            let code = random_code(4);
            assert_eq!(code.as_str().len(), 4);
            assert!(code.as_str().bytes().all(|b| ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_random_code_zero_length_is_empty() {
        assert_eq!(random_code(0).as_str(), "");
    }
}
