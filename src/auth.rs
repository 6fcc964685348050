//! Email/password identity for the admin surface.
//!
//! The [`IdentityProvider`] trait mirrors the backend's auth contract:
//! sign-in, sign-up (which also signs the new account in), sign-out, and
//! a cached current-user lookup. Sessions live in memory only; nothing
//! is persisted across restarts. [`MemoryIdentity`] is the in-process
//! implementation used by tests and demos, `RestIdentity` in the `rest`
//! module talks to the hosted identity endpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{AdminError, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The signed-in administrator. `uid` is the backend-assigned identity
/// key, stable across sessions for the same account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminUser {
    pub uid: String,
    pub email: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The cached session, if one is active. Never touches the network.
    fn current_user(&self) -> Option<AdminUser>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AdminUser>;

    /// Creates the account and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<AdminUser>;

    fn sign_out(&self);
}

/// Rejects blank credentials before any backend call. Returns the email
/// trimmed; the password is passed through verbatim.
pub(crate) fn require_credentials<'a>(
    email: &'a str,
    password: &'a str,
) -> Result<(&'a str, &'a str)> {
    let email = email.trim();
    if email.is_empty() || password.trim().is_empty() {
        return Err(AdminError::validation("Please enter email and password"));
    }
    Ok((email, password))
}

// ---------------------------------------------------------------------------
// In-memory provider
// ---------------------------------------------------------------------------

struct MemoryAccount {
    uid: String,
    password: String,
}

/// Identity provider backed by a process-local account table. Accounts
/// are keyed by trimmed email; each gets a uid minted once at sign-up.
#[derive(Default)]
pub struct MemoryIdentity {
    accounts: Mutex<HashMap<String, MemoryAccount>>,
    current: Mutex<Option<AdminUser>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    fn current_user(&self) -> Option<AdminUser> {
        self.current.lock().unwrap().clone()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AdminUser> {
        let (email, password) = require_credentials(email, password)?;
        let user = {
            let accounts = self.accounts.lock().unwrap();
            let account = accounts
                .get(email)
                .filter(|a| a.password == password)
                .ok_or_else(|| {
                    AdminError::storage(
                        "sign in",
                        email,
                        anyhow::anyhow!("INVALID_LOGIN_CREDENTIALS"),
                    )
                })?;
            AdminUser {
                uid: account.uid.clone(),
                email: email.to_string(),
            }
        };
        *self.current.lock().unwrap() = Some(user.clone());
        info!(uid = %user.uid, "signed in");
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AdminUser> {
        let (email, password) = require_credentials(email, password)?;
        let user = {
            let mut accounts = self.accounts.lock().unwrap();
            if accounts.contains_key(email) {
                return Err(AdminError::storage(
                    "sign up",
                    email,
                    anyhow::anyhow!("EMAIL_EXISTS"),
                ));
            }
            let uid = Uuid::new_v4().to_string();
            accounts.insert(
                email.to_string(),
                MemoryAccount {
                    uid: uid.clone(),
                    password: password.to_string(),
                },
            );
            AdminUser {
                uid,
                email: email.to_string(),
            }
        };
        *self.current.lock().unwrap() = Some(user.clone());
        info!(uid = %user.uid, "account created and signed in");
        Ok(user)
    }

    fn sign_out(&self) {
        if let Some(user) = self.current.lock().unwrap().take() {
            info!(uid = %user.uid, "signed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_up_mints_a_uid_and_signs_the_account_in() {
        let identity = MemoryIdentity::new();
        assert!(identity.current_user().is_none());

        let user = identity.sign_up("asha@example.com", "hunter2").await.unwrap();
        assert!(!user.uid.is_empty());
        assert_eq!(user.email, "asha@example.com");
        assert_eq!(identity.current_user(), Some(user));
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_rejected() {
        let identity = MemoryIdentity::new();
        identity.sign_up("asha@example.com", "hunter2").await.unwrap();

        let err = identity
            .sign_up("asha@example.com", "other")
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Storage { op: "sign up", .. }));
    }

    #[tokio::test]
    async fn blank_credentials_are_rejected_without_a_session() {
        let identity = MemoryIdentity::new();
        for (email, password) in [("", "pw"), ("a@b.example", ""), ("   ", "pw")] {
            let err = identity.sign_in(email, password).await.unwrap_err();
            assert_eq!(err.to_string(), "Please enter email and password");
        }
        assert!(identity.current_user().is_none());
    }

    #[tokio::test]
    async fn wrong_password_is_rejected_and_leaves_no_session() {
        let identity = MemoryIdentity::new();
        identity.sign_up("asha@example.com", "hunter2").await.unwrap();
        identity.sign_out();

        let err = identity
            .sign_in("asha@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Storage { op: "sign in", .. }));
        assert!(identity.current_user().is_none());
    }

    #[tokio::test]
    async fn sign_in_returns_the_uid_minted_at_sign_up() {
        let identity = MemoryIdentity::new();
        let created = identity.sign_up("asha@example.com", "hunter2").await.unwrap();
        identity.sign_out();
        assert!(identity.current_user().is_none());

        let returned = identity
            .sign_in("asha@example.com", "hunter2")
            .await
            .unwrap();
        assert_eq!(returned.uid, created.uid);
        assert_eq!(identity.current_user(), Some(returned));
    }

    #[tokio::test]
    async fn email_is_trimmed_before_lookup() {
        let identity = MemoryIdentity::new();
        identity.sign_up("  asha@example.com ", "hunter2").await.unwrap();

        let user = identity
            .sign_in(" asha@example.com  ", "hunter2")
            .await
            .unwrap();
        assert_eq!(user.email, "asha@example.com");
    }
}
