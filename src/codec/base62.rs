//! Bijective Base-62
//!
//! Encoding repeatedly takes `id mod 62` as the next (leftmost) symbol and
//! continues with `id / 62 - 1`, stopping once that goes negative. The `- 1`
//! is what makes the system bijective: without it `"0A"` and `"A"` would both
//! be spellings of the same value.
//!
//! Decoding is the inverse: each symbol contributes `index + 1` at its
//! position, and the final sum is shifted back by one.

use crate::error::{Result, ShortnError};

/// The 62 code symbols, in value order.
pub const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const BASE: i64 = 62;

/// Longest code an `i64` can produce (`i64::MAX` encodes to 11 symbols).
pub const MAX_CODE_LEN: usize = 11;

/// Maps identifiers to codes.
///
/// The production implementation is [`Base62Encoder`]; tests substitute their
/// own to force failures at the encoding step.
pub trait CodeEncoder: Send + Sync {
    fn encode(&self, id: i64) -> Result<String>;
}

/// Stateless bijective base-62 encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base62Encoder;

impl CodeEncoder for Base62Encoder {
    fn encode(&self, id: i64) -> Result<String> {
        encode(id)
    }
}

/// Encodes a non-negative identifier.
///
/// Fails with [`ShortnError::Validation`] when `id` is negative.
pub fn encode(id: i64) -> Result<String> {
    if id < 0 {
        return Err(ShortnError::Validation(format!(
            "cannot encode negative id {}",
            id
        )));
    }

    let mut buf = [0u8; MAX_CODE_LEN];
    let mut pos = MAX_CODE_LEN;
    let mut n = id;

    loop {
        pos -= 1;
        buf[pos] = ALPHABET[(n % BASE) as usize];
        n = n / BASE - 1;
        if n < 0 {
            break;
        }
    }

    Ok(buf[pos..].iter().map(|&b| b as char).collect())
}

/// Decodes a code back into its identifier.
///
/// Fails with [`ShortnError::Validation`] for empty input, symbols outside
/// the alphabet, or codes naming a value beyond `i64::MAX`.
pub fn decode(code: &str) -> Result<i64> {
    if code.is_empty() {
        return Err(ShortnError::Validation("empty code".to_string()));
    }

    let mut acc: u64 = 0;
    for byte in code.bytes() {
        let digit = symbol_value(byte).ok_or_else(|| {
            ShortnError::Validation(format!("invalid symbol {:?} in code", byte as char))
        })?;
        acc = acc
            .checked_mul(BASE as u64)
            .and_then(|v| v.checked_add(digit + 1))
            .ok_or_else(|| ShortnError::Validation(format!("code {} is out of range", code)))?;
    }

    // acc >= 1 because the code is non-empty
    i64::try_from(acc - 1)
        .map_err(|_| ShortnError::Validation(format!("code {} is out of range", code)))
}

/// Returns true if `code` is non-empty and uses only alphabet symbols.
///
/// This does not check that the code decodes to an `i64`.
pub fn is_valid_code(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| symbol_value(b).is_some())
}

#[inline]
fn symbol_value(byte: u8) -> Option<u64> {
    match byte {
        b'0'..=b'9' => Some((byte - b'0') as u64),
        b'A'..=b'Z' => Some((byte - b'A') as u64 + 10),
        b'a'..=b'z' => Some((byte - b'a') as u64 + 36),
        _ => None,
    }
}
