/// Small byte and time helpers shared by the sign-in and key-fetch flows.
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CoreError, Result};

/// XOR two equal-length byte strings (`wrapkB ⊕ unwrapkB` → `kB`).
pub fn xored_with(lhs: &[u8], rhs: &[u8]) -> Result<Vec<u8>> {
    if lhs.len() != rhs.len() {
        return Err(CoreError::MalformedInput(format!(
            "Cannot XOR {} bytes with {} bytes",
            lhs.len(),
            rhs.len()
        )));
    }
    Ok(lhs.iter().zip(rhs).map(|(a, b)| a ^ b).collect())
}

/// Milliseconds since the Unix epoch, as the protocol's signed timestamp.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xored_with() {
        let a = [0xFFu8, 0x00, 0xAA];
        let b = [0x0Fu8, 0xF0, 0xAA];
        assert_eq!(xored_with(&a, &b).unwrap(), vec![0xF0, 0xF0, 0x00]);
    }

    #[test]
    fn test_xored_with_length_mismatch() {
        assert!(xored_with(&[0u8; 4], &[0u8; 5]).is_err());
    }

    #[test]
    fn test_xor_recovers_kb() {
        let wrap_kb = [0x5Au8; 32];
        let unwrap_kb = [0xA5u8; 32];
        let kb = xored_with(&wrap_kb, &unwrap_kb).unwrap();
        assert_eq!(kb, vec![0xFF; 32]);
        assert_eq!(xored_with(&kb, &unwrap_kb).unwrap(), wrap_kb.to_vec());
    }

    #[test]
    fn test_now_ms_is_positive() {
        assert!(now_ms() > 0);
    }
}
