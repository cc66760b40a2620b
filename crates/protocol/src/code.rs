//! Human-typable pairing codes.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Characters allowed in a pairing code.
///
/// Visually ambiguous glyphs (I, L, O, U, 0, 1) are excluded so codes can be
/// read off a screen and typed into a phone without guesswork.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTVWXYZ23456789";

/// Length of a pairing code in characters.
pub const CODE_LEN: usize = 6;

/// A six-character pairing code, stored canonically uppercase.
///
/// Input is case-insensitive: `SessionCode::parse("abc234")` and
/// `SessionCode::parse("ABC234")` produce the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode([u8; CODE_LEN]);

impl SessionCode {
    /// Parses user input into a canonical code.
    ///
    /// Uppercases ASCII letters and rejects anything outside the alphabet.
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let trimmed = input.trim();
        if trimmed.len() != CODE_LEN {
            return Err(CodeError::InvalidLength(trimmed.len()));
        }
        let mut out = [0u8; CODE_LEN];
        for (slot, byte) in out.iter_mut().zip(trimmed.bytes()) {
            let upper = byte.to_ascii_uppercase();
            if !CODE_ALPHABET.contains(&upper) {
                return Err(CodeError::InvalidCharacter(byte as char));
            }
            *slot = upper;
        }
        Ok(Self(out))
    }

    /// Draws a fresh code uniformly from the alphabet.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut out = [0u8; CODE_LEN];
        for slot in &mut out {
            *slot = CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())];
        }
        Self(out)
    }

    /// The canonical uppercase form.
    pub fn as_str(&self) -> &str {
        // Codes only ever hold alphabet bytes, which are ASCII.
        std::str::from_utf8(&self.0).expect("code bytes are ASCII")
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SessionCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.as_str().to_owned()
    }
}

/// Errors from pairing code parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("pairing code must be {CODE_LEN} characters, got {0}")]
    InvalidLength(usize),

    #[error("invalid character in pairing code: {0:?}")]
    InvalidCharacter(char),
}
