use std::str::FromStr;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

/// How passwords are kept in the user record. Everything that stores
/// or compares a password goes through here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PasswordScheme {
    #[default]
    Plaintext,
    Argon2,
}

impl FromStr for PasswordScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plaintext" => Ok(Self::Plaintext),
            "argon2" => Ok(Self::Argon2),
            other => anyhow::bail!("unknown PASSWORD_SCHEME {other:?}"),
        }
    }
}

impl PasswordScheme {
    /// Value to persist for a freshly chosen password.
    pub fn store(&self, plain: &str) -> anyhow::Result<String> {
        let plain = plain.trim();
        match self {
            Self::Plaintext => Ok(plain.to_string()),
            Self::Argon2 => hash_password(plain),
        }
    }

    /// Value to persist for a password that may already be in stored
    /// form. Under Argon2 anything that is not a PHC hash string gets hashed.
    pub fn keep_or_store(&self, value: &str) -> anyhow::Result<String> {
        let value = value.trim();
        match self {
            Self::Argon2 if PasswordHash::new(value).is_ok() => Ok(value.to_string()),
            _ => self.store(value),
        }
    }

    pub fn verify(&self, plain: &str, stored: &str) -> anyhow::Result<bool> {
        let plain = plain.trim();
        match self {
            Self::Plaintext => Ok(plain == stored),
            Self::Argon2 => verify_password(plain, stored),
        }
    }
}

fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
