//! Credential lookup and CONNECT-time authentication.
//!
//! The broker consults a [`CredentialStore`] synchronously while processing
//! CONNECT. [`StaticCredentials`] backs the store with the configured user
//! list; embedders can substitute their own implementation.
//!
//! Passwords are either plaintext (development) or argon2 hashes in PHC
//! string format. Generate hashes with:
//! ```bash
//! echo -n "password" | argon2 $(openssl rand -base64 16) -id -e
//! ```

use std::net::IpAddr;

use ahash::AHashMap;
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use mqrelay_core::packet::reason;

use crate::config::AuthConfig;

/// Stored credentials for one user.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Plaintext password (if configured). Use only for development.
    pub password: Option<String>,
    /// Argon2 password hash in PHC string format. Takes priority over the
    /// plaintext password when both are set.
    pub password_hash: Option<String>,
    /// Source addresses the user may connect from. Empty allows any.
    pub allowed_addresses: Vec<IpAddr>,
}

/// Synchronous credential lookup consulted during CONNECT processing.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, username: &str) -> Option<Credentials>;
}

/// Credential store backed by the configured user list.
pub struct StaticCredentials {
    enabled: bool,
    allow_anonymous: bool,
    users: AHashMap<String, Credentials>,
}

impl StaticCredentials {
    pub fn new(config: &AuthConfig) -> Self {
        let mut users = AHashMap::with_capacity(config.users.len());

        for user in &config.users {
            users.insert(
                user.username.clone(),
                Credentials {
                    password: user.password.clone(),
                    password_hash: user.password_hash.clone(),
                    allowed_addresses: user.allowed_addresses.clone(),
                },
            );
        }

        Self {
            enabled: config.enabled,
            allow_anonymous: config.allow_anonymous,
            users,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn allow_anonymous(&self) -> bool {
        self.allow_anonymous
    }
}

impl CredentialStore for StaticCredentials {
    fn lookup(&self, username: &str) -> Option<Credentials> {
        self.users.get(username).cloned()
    }
}

/// Outcome of a CONNECT authentication check, as a CONNACK reason code.
/// `reason::SUCCESS` means the connection may proceed.
pub fn authenticate(
    store: &dyn CredentialStore,
    enabled: bool,
    allow_anonymous: bool,
    username: Option<&str>,
    password: Option<&[u8]>,
    remote_addr: IpAddr,
) -> u8 {
    if !enabled {
        return reason::SUCCESS;
    }

    let Some(username) = username else {
        return if allow_anonymous {
            reason::SUCCESS
        } else {
            reason::NOT_AUTHORIZED
        };
    };

    let Some(credentials) = store.lookup(username) else {
        return reason::BAD_USERNAME_OR_PASSWORD;
    };

    if !credentials.allowed_addresses.is_empty()
        && !credentials.allowed_addresses.contains(&remote_addr)
    {
        log::warn!("user '{}' connecting from disallowed address {}", username, remote_addr);
        return reason::NOT_AUTHORIZED;
    }

    let Some(password) = password else {
        return reason::BAD_USERNAME_OR_PASSWORD;
    };

    if verify_password(&credentials, password) {
        reason::SUCCESS
    } else {
        reason::BAD_USERNAME_OR_PASSWORD
    }
}

fn verify_password(credentials: &Credentials, password: &[u8]) -> bool {
    // Argon2 hash takes priority over plaintext
    if let Some(hash_str) = &credentials.password_hash {
        return verify_argon2(hash_str, password);
    }

    if let Some(stored) = &credentials.password {
        return password == stored.as_bytes();
    }

    false
}

fn verify_argon2(hash_str: &str, password: &[u8]) -> bool {
    let Ok(parsed_hash) = PasswordHash::new(hash_str) else {
        log::warn!("invalid argon2 hash format in credential store");
        return false;
    };

    Argon2::default()
        .verify_password(password, &parsed_hash)
        .is_ok()
}
