//! Caller identity as handed over by the authentication collaborator
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CommerceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn customer(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), CommerceError> {
        if self.is_admin() {
            return Ok(());
        }
        Err(CommerceError::Forbidden(format!(
            "user {} is not an administrator",
            self.user_id
        )))
    }
}

/// Resolves a bearer credential to a verified identity.
///
/// Token issuance lives outside this crate; implementations only look up.
pub trait Authenticator: Send + Sync {
    fn resolve(&self, bearer: &str) -> Option<Identity>;
}

/// Fixed token table, loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct TokenTable {
    tokens: HashMap<String, Identity>,
}

impl TokenTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }

    pub fn with(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.insert(token, identity);
        self
    }

    /// Parses `token=user:role` pairs separated by `;`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut table = Self::new();
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, rest) = entry
                .split_once('=')
                .ok_or_else(|| format!("missing '=' in token entry '{entry}'"))?;
            let (user, role) = rest
                .split_once(':')
                .ok_or_else(|| format!("missing ':' in token entry '{entry}'"))?;
            let role = match role.trim() {
                "admin" => Role::Admin,
                "customer" => Role::Customer,
                other => return Err(format!("unknown role '{other}'")),
            };
            table.insert(
                token.trim(),
                Identity {
                    user_id: user.trim().to_string(),
                    role,
                },
            );
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for TokenTable {
    fn resolve(&self, bearer: &str) -> Option<Identity> {
        self.tokens.get(bearer).cloned()
    }
}
