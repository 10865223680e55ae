//! Password hashes for practitioner accounts.
//!
//! Stored as an Argon2 PHC string (`$argon2id$v=19$...`), which carries its
//! own salt and parameters. The plaintext password is never persisted.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::store_error::{StoreError, StoreResult};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential {
    phc: String,
}

impl Credential {
    /// Hash `password` under a fresh random salt.
    pub fn from_password(password: &str) -> StoreResult<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let phc = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| StoreError::Validation(format!("cannot hash password: {e}")))?
            .to_string();

        Ok(Self { phc })
    }

    /// Check `password` against the stored hash. A malformed hash never verifies.
    pub fn verify(&self, password: &str) -> bool {
        match PasswordHash::new(&self.phc) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                warn!("Stored credential is not a valid password hash: {e}");
                false
            }
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("phc", &"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_only_the_original_password() {
        let credential = Credential::from_password("s3cret!").unwrap();
        assert!(credential.verify("s3cret!"));
        assert!(!credential.verify("s3cret"));
        assert!(!credential.verify(""));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let a = Credential::from_password("hunter2").unwrap();
        let b = Credential::from_password("hunter2").unwrap();
        assert_ne!(a, b);
        assert!(a.verify("hunter2") && b.verify("hunter2"));
    }

    #[test]
    fn serialized_form_is_an_argon2_hash() {
        let credential = Credential::from_password("plaintext-password").unwrap();
        let json = serde_json::to_string(&credential).unwrap();
        assert!(json.starts_with("\"$argon2"));
        assert!(!json.contains("plaintext-password"));
        assert!(!format!("{credential:?}").contains(&credential.phc));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let credential = Credential {
            phc: "not-a-phc-string".to_string(),
        };
        assert!(!credential.verify("anything"));
    }
}
