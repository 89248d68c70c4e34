//! Authenticators, selected by name from configuration.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Longest username a Beta client will send.
pub const MAX_USERNAME_LEN: usize = 16;

/// Challenge sent by authenticators that do not verify accounts.
pub const OFFLINE_CHALLENGE: &str = "-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Continue { challenge: String },
    Reject(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Accept,
    Reject(String),
}

/// What the client claimed at login.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    /// The name given in the earlier handshake.
    pub handshake_username: String,
    pub protocol: i32,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handshake(&self, peer: SocketAddr, username: &str) -> HandshakeOutcome;

    async fn login(&self, peer: SocketAddr, request: &LoginRequest) -> LoginOutcome;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown authenticator {0:?} (available: offline, whitelist)")]
    Unknown(String),
}

/// Build the authenticator registered as `name`.
pub fn by_name(name: &str, whitelist: &[String]) -> Result<Arc<dyn Authenticator>, AuthError> {
    match name {
        "offline" => Ok(Arc::new(OfflineAuthenticator)),
        "whitelist" => Ok(Arc::new(WhitelistAuthenticator::new(whitelist))),
        other => Err(AuthError::Unknown(other.to_string())),
    }
}

pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ── Offline ──────────────────────────────────────────────────────────────────

/// Accepts any well-formed name without contacting an account service.
pub struct OfflineAuthenticator;

#[async_trait]
impl Authenticator for OfflineAuthenticator {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn handshake(&self, _peer: SocketAddr, username: &str) -> HandshakeOutcome {
        if !is_valid_username(username) {
            return HandshakeOutcome::Reject("Invalid username".into());
        }
        HandshakeOutcome::Continue {
            challenge: OFFLINE_CHALLENGE.into(),
        }
    }

    async fn login(&self, _peer: SocketAddr, request: &LoginRequest) -> LoginOutcome {
        if !is_valid_username(&request.username) {
            return LoginOutcome::Reject("Invalid username".into());
        }
        if request.username != request.handshake_username {
            return LoginOutcome::Reject("Username does not match handshake".into());
        }
        LoginOutcome::Accept
    }
}

// ── Whitelist ────────────────────────────────────────────────────────────────

/// Offline rules, restricted to a fixed set of names (case-insensitive).
pub struct WhitelistAuthenticator {
    allowed: HashSet<String>,
}

impl WhitelistAuthenticator {
    pub fn new(names: &[String]) -> Self {
        Self {
            allowed: names.iter().map(|n| n.to_ascii_lowercase()).collect(),
        }
    }

    fn allows(&self, name: &str) -> bool {
        self.allowed.contains(&name.to_ascii_lowercase())
    }
}

#[async_trait]
impl Authenticator for WhitelistAuthenticator {
    fn name(&self) -> &'static str {
        "whitelist"
    }

    async fn handshake(&self, peer: SocketAddr, username: &str) -> HandshakeOutcome {
        if !self.allows(username) {
            tracing::info!("{} ({}) is not whitelisted", username, peer);
            return HandshakeOutcome::Reject("You are not on the whitelist".into());
        }
        OfflineAuthenticator.handshake(peer, username).await
    }

    async fn login(&self, peer: SocketAddr, request: &LoginRequest) -> LoginOutcome {
        if !self.allows(&request.username) {
            return LoginOutcome::Reject("You are not on the whitelist".into());
        }
        OfflineAuthenticator.login(peer, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn request(username: &str, handshake: &str) -> LoginRequest {
        LoginRequest {
            username: username.into(),
            handshake_username: handshake.into(),
            protocol: 10,
        }
    }

    #[tokio::test]
    async fn offline_rejects_bad_names_and_mismatches() {
        let auth = OfflineAuthenticator;
        assert_eq!(
            auth.handshake(peer(), "notch").await,
            HandshakeOutcome::Continue { challenge: "-".into() }
        );
        assert!(matches!(
            auth.handshake(peer(), "no spaces").await,
            HandshakeOutcome::Reject(_)
        ));
        assert_eq!(auth.login(peer(), &request("notch", "notch")).await, LoginOutcome::Accept);
        assert!(matches!(
            auth.login(peer(), &request("notch", "jeb")).await,
            LoginOutcome::Reject(_)
        ));
    }

    #[tokio::test]
    async fn whitelist_ignores_case() {
        let auth = by_name("whitelist", &["Alice".to_string()]).unwrap();
        assert_eq!(auth.name(), "whitelist");
        assert!(matches!(
            auth.handshake(peer(), "alice").await,
            HandshakeOutcome::Continue { .. }
        ));
        assert!(matches!(
            auth.handshake(peer(), "mallory").await,
            HandshakeOutcome::Reject(_)
        ));
        assert_eq!(auth.login(peer(), &request("ALICE", "ALICE")).await, LoginOutcome::Accept);
    }

    #[test]
    fn unknown_authenticator_is_an_error() {
        assert_eq!(
            by_name("ldap", &[]).err(),
            Some(AuthError::Unknown("ldap".into()))
        );
    }
}
