use anyhow::Context;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::{rngs::OsRng, seq::SliceRandom, Rng, RngCore};
use tracing::error;

const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*";
const GENERATED_LEN: usize = 12;

/// Symbols accepted by [`validate_password_strength`].
const STRENGTH_SYMBOLS: &str = "@$!%*?&";

fn hash_blocking(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn verify_blocking(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Argon2id with a random salt, run off the async workers.
pub async fn hash_password(plain: &str) -> anyhow::Result<String> {
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || hash_blocking(&plain))
        .await
        .context("password hash task")?
}

pub async fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let (plain, hash) = (plain.to_owned(), hash.to_owned());
    tokio::task::spawn_blocking(move || verify_blocking(&plain, &hash))
        .await
        .context("password verify task")?
}

lazy_static! {
    /// Hash of a password nobody holds, checked when a login names no account.
    static ref DUMMY_HASH: Option<String> = hash_blocking("vrdash-no-such-account").ok();
}

/// Spends one argon2 verification when there is no account to check
/// against, so unknown emails cost the same as wrong passwords.
pub async fn verify_without_account(plain: &str) -> bool {
    let plain = plain.to_owned();
    tokio::task::spawn_blocking(move || match DUMMY_HASH.as_deref() {
        Some(hash) => verify_blocking(&plain, hash).unwrap_or(false),
        None => false,
    })
    .await
    .unwrap_or_else(|e| {
        error!(error = %e, "dummy password verify task");
        false
    })
}

/// Twelve characters with at least one upper, lower, digit and symbol, shuffled.
pub fn generate_secure_password() -> String {
    let mut rng = rand::thread_rng();
    let classes = [UPPER, LOWER, DIGITS, SYMBOLS];
    let all: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .map(|set| set[rng.gen_range(0..set.len())])
        .collect();
    while chars.len() < GENERATED_LEN {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

/// 32 random bytes, hex encoded.
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Every rule the password breaks; empty when it is acceptable.
pub fn validate_password_strength(password: &str) -> Vec<&'static str> {
    let mut errors = Vec::new();
    if password.chars().count() < 8 {
        errors.push("Password must be at least 8 characters long");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("Password must contain at least one number");
    }
    if !password.chars().any(|c| STRENGTH_SYMBOLS.contains(c)) {
        errors.push("Password must contain at least one special character (@$!%*?&)");
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).await.expect("hashing should succeed");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(password, &hash).await.expect("verify should succeed"));
    }

    #[tokio::test]
    async fn verify_rejects_wrong_password() {
        let hash = hash_password("correct-horse-battery-staple").await.unwrap();
        assert!(!verify_password("wrong-password", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn verification_without_account_uses_a_real_hash() {
        let hash = DUMMY_HASH.as_deref().expect("dummy hash should be computed");
        assert!(PasswordHash::new(hash).is_ok());
        assert!(!verify_without_account("Secret123!").await);
        assert!(verify_without_account("vrdash-no-such-account").await);
    }

    #[tokio::test]
    async fn verify_errors_on_malformed_hash() {
        assert!(verify_password("anything", "not-a-valid-hash").await.is_err());
    }

    #[test]
    fn generated_passwords_cover_every_class() {
        for _ in 0..200 {
            let pw = generate_secure_password();
            assert_eq!(pw.len(), GENERATED_LEN);
            assert!(pw.bytes().any(|b| UPPER.contains(&b)));
            assert!(pw.bytes().any(|b| LOWER.contains(&b)));
            assert!(pw.bytes().any(|b| DIGITS.contains(&b)));
            assert!(pw.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn reset_token_is_64_hex_chars() {
        let token = generate_reset_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_reset_token());
    }

    #[test]
    fn strength_rules() {
        assert!(validate_password_strength("Str0ng@pass").is_empty());
        let errors = validate_password_strength("weak");
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("8 characters")));
        assert_eq!(validate_password_strength("NoSymbol123").len(), 1);
    }
}
