//! Password policy and a generator that satisfies it (spec §4.3).

use rand::seq::SliceRandom;
use rand::Rng;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+";

/// Minimum length for a human admin-user password.
pub const MIN_LENGTH_ADMIN: usize = 8;
/// Minimum length for a system/service account password.
pub const MIN_LENGTH_SYSTEM: usize = 12;

/// Why a candidate password failed [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// Shorter than the length required for this account kind.
    TooShort { required: usize },
    /// Missing a lowercase letter.
    MissingLower,
    /// Missing an uppercase letter.
    MissingUpper,
    /// Missing a digit.
    MissingDigit,
    /// Missing a symbol.
    MissingSymbol,
}

/// Validate `candidate` against the policy for `is_system`.
pub fn validate(candidate: &str, is_system: bool) -> Result<(), Vec<PolicyViolation>> {
    let required = if is_system { MIN_LENGTH_SYSTEM } else { MIN_LENGTH_ADMIN };
    let mut violations = Vec::new();

    if candidate.len() < required {
        violations.push(PolicyViolation::TooShort { required });
    }
    if !candidate.bytes().any(|b| LOWER.contains(&b)) {
        violations.push(PolicyViolation::MissingLower);
    }
    if !candidate.bytes().any(|b| UPPER.contains(&b)) {
        violations.push(PolicyViolation::MissingUpper);
    }
    if !candidate.bytes().any(|b| DIGITS.contains(&b)) {
        violations.push(PolicyViolation::MissingDigit);
    }
    if !candidate.bytes().any(|b| SYMBOLS.contains(&b)) {
        violations.push(PolicyViolation::MissingSymbol);
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Generate a password that satisfies the policy: one character from each
/// required class, padded to length with a uniform mix, then shuffled so
/// the guaranteed characters aren't predictably placed at the front.
pub fn generate(is_system: bool) -> String {
    let length = if is_system { MIN_LENGTH_SYSTEM } else { MIN_LENGTH_ADMIN };
    let mut rng = rand::thread_rng();

    let mut chars: Vec<u8> = vec![
        *LOWER.choose(&mut rng).unwrap(),
        *UPPER.choose(&mut rng).unwrap(),
        *DIGITS.choose(&mut rng).unwrap(),
        *SYMBOLS.choose(&mut rng).unwrap(),
    ];

    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SYMBOLS].concat();
    while chars.len() < length {
        chars.push(*all.choose(&mut rng).unwrap());
    }

    chars.shuffle(&mut rng);
    String::from_utf8(chars).expect("generated password is ASCII")
}

/// Whether `candidate` matches any of the last-5 historical bcrypt hashes.
pub fn matches_history(candidate: &str, history: &[String]) -> bool {
    history.iter().any(|hash| bcrypt::verify(candidate, hash).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_admin_password_passes_its_own_policy() {
        for _ in 0..20 {
            let pw = generate(false);
            assert_eq!(pw.len(), MIN_LENGTH_ADMIN);
            assert!(validate(&pw, false).is_ok());
        }
    }

    #[test]
    fn generated_system_password_passes_its_own_policy() {
        let pw = generate(true);
        assert_eq!(pw.len(), MIN_LENGTH_SYSTEM);
        assert!(validate(&pw, true).is_ok());
    }

    #[test]
    fn short_password_is_rejected() {
        let violations = validate("Ab1!", false).unwrap_err();
        assert!(violations.contains(&PolicyViolation::TooShort { required: MIN_LENGTH_ADMIN }));
    }

    #[test]
    fn missing_symbol_is_rejected() {
        let violations = validate("Abcdefgh1", false).unwrap_err();
        assert!(violations.contains(&PolicyViolation::MissingSymbol));
    }
}
