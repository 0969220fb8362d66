//! Ticket codes.
//!
//! A code is what the buyer shows at the gate: 12 symbols drawn from
//! `A-Z0-9`. Uniqueness is enforced by the store, not here.

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Symbols a code may contain.
pub const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of symbols in a code.
pub const CODE_LEN: usize = 12;

/// A well-formed ticket code.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TicketCode(String);

/// Input that cannot be a ticket code.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("'{0}' is not a ticket code")]
pub struct InvalidCode(pub String);

impl TicketCode {
    /// Normalises gate input (trim, upper-case) and checks length and alphabet.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCode`] when the normalised input is not exactly
    /// [`CODE_LEN`] symbols of [`ALPHABET`].
    pub fn parse(raw: &str) -> Result<Self, InvalidCode> {
        let normalised = raw.trim().to_ascii_uppercase();
        let well_formed = normalised.len() == CODE_LEN
            && normalised.bytes().all(|b| ALPHABET.contains(&b));

        if well_formed {
            Ok(Self(normalised))
        } else {
            Err(InvalidCode(raw.to_string()))
        }
    }

    /// The code as stored and printed on the ticket
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TicketCode {
    type Error = InvalidCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TicketCode> for String {
    fn from(code: TicketCode) -> Self {
        code.0
    }
}

/// Source of fresh ticket codes.
pub trait CodeGenerator: Send + Sync {
    /// Produces a candidate code. It may collide with an existing one.
    fn generate(&self) -> TicketCode;
}

/// Draws each symbol from the operating system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> TicketCode {
        let mut rng = OsRng;
        let code = (0..CODE_LEN)
            .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
            .collect();
        TicketCode(code)
    }
}

/// Hands out a fixed list of codes first, then falls back to random ones.
///
/// Lets tests force a collision on the first attempt and watch the issuer
/// retry.
#[derive(Debug)]
pub struct ScriptedCodeGenerator {
    script: Mutex<VecDeque<TicketCode>>,
}

impl ScriptedCodeGenerator {
    /// Creates a generator that yields `codes` in order before going random
    #[must_use]
    pub fn new(codes: impl IntoIterator<Item = TicketCode>) -> Self {
        Self {
            script: Mutex::new(codes.into_iter().collect()),
        }
    }

    /// Codes not handed out yet
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl CodeGenerator for ScriptedCodeGenerator {
    fn generate(&self) -> TicketCode {
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| RandomCodeGenerator.generate())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_codes_are_well_formed() {
        let generator = RandomCodeGenerator;
        for _ in 0..200 {
            let code = generator.generate();
            assert_eq!(TicketCode::parse(code.as_str()), Ok(code));
        }
    }

    #[test]
    fn test_random_codes_rarely_repeat() {
        let generator = RandomCodeGenerator;
        let codes: HashSet<_> = (0..1_000).map(|_| generator.generate()).collect();
        assert_eq!(codes.len(), 1_000);
    }

    #[test]
    fn test_parse_normalises_gate_input() {
        let code = TicketCode::parse("  ab12cd34ef56\n").unwrap();
        assert_eq!(code.as_str(), "AB12CD34EF56");
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!(TicketCode::parse("").is_err());
        assert!(TicketCode::parse("AB12CD34EF5").is_err());
        assert!(TicketCode::parse("AB12CD34EF567").is_err());
        assert!(TicketCode::parse("AB12-D34EF56").is_err());
        assert!(TicketCode::parse("ÁB12CD34EF56").is_err());
    }

    #[test]
    fn test_scripted_generator_then_random() {
        let fixed = TicketCode::parse("AAAAAAAAAAAA").unwrap();
        let generator = ScriptedCodeGenerator::new([fixed.clone(), fixed.clone()]);

        assert_eq!(generator.generate(), fixed);
        assert_eq!(generator.generate(), fixed);
        assert_eq!(generator.remaining(), 0);
        assert_ne!(generator.generate(), fixed);
    }

    #[test]
    fn test_serde_rejects_bad_code() {
        let ok: TicketCode = serde_json::from_str("\"ZZZZ0000ZZZZ\"").unwrap();
        assert_eq!(ok.as_str(), "ZZZZ0000ZZZZ");
        assert!(serde_json::from_str::<TicketCode>("\"short\"").is_err());
    }
}
