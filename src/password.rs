//! Credential hashing used by administrator bootstrap.

use anyhow::{Result, anyhow};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::Rng;

/// Alphabet for generated passwords; visually ambiguous characters are left out.
const PASSWORD_ALPHABET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!@#$%^&*";

/// Length of generated bootstrap passwords.
pub const GENERATED_PASSWORD_LEN: usize = 16;

/// Hashes a password into a PHC string using Argon2id with a random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    rand::rng().fill(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| anyhow!("failed to encode salt: {e}"))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// Checks a password against a stored PHC hash.
///
/// A stored value that is not a parseable hash never matches.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Generates a random password from the OS-seeded thread generator.
pub fn generate_password(len: usize) -> String {
    let len = if len == 0 { GENERATED_PASSWORD_LEN } else { len };
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(PASSWORD_ALPHABET[rng.random_range(0..PASSWORD_ALPHABET.len())]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn same_password_hashes_differently() {
        assert_ne!(hash_password("pw").unwrap(), hash_password("pw").unwrap());
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("admin123", "admin123"));
        assert!(!verify_password("", ""));
    }

    #[test]
    fn generated_passwords_use_alphabet() {
        let pw = generate_password(GENERATED_PASSWORD_LEN);
        assert_eq!(pw.len(), GENERATED_PASSWORD_LEN);
        assert!(pw.bytes().all(|b| PASSWORD_ALPHABET.contains(&b)));
        assert_eq!(generate_password(0).len(), GENERATED_PASSWORD_LEN);
    }
}
