use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretStatus {
    Active,
    Disabled,
}

/// Credential record identifying an API caller and the tenant that owns it.
///
/// `signing_key` is the shared HMAC key used to verify bearer tokens issued
/// for this secret. It never leaves the node except through replication.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub id: String,
    pub signing_key: String,
    pub owner: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub status: SecretStatus,
    #[serde(default)]
    pub description: Option<String>,
}

impl Secret {
    pub fn active(id: &str, signing_key: &str, owner: &str) -> Self {
        Self {
            id: id.to_string(),
            signing_key: signing_key.to_string(),
            owner: owner.to_string(),
            expires_at: None,
            status: SecretStatus::Active,
            description: None,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    pub fn is_usable(&self, now: i64) -> bool {
        self.status == SecretStatus::Active && !self.is_expired(now)
    }

    pub fn signing_key_bytes(&self) -> &[u8] {
        self.signing_key.as_bytes()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Matcher {
    Any,
    Exact(String),
    Prefix(String),
    Pattern(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
    Matches { key: String, pattern: String },
    Cidr { key: String, cidr: String },
    Bool { key: String, value: bool },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(default)]
    pub sid: Option<String>,
    pub effect: Effect,
    pub actions: Vec<Matcher>,
    pub resources: Vec<Matcher>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    pub statements: Vec<Statement>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub owner: String,
    pub document: PolicyDocument,
}

pub type RequestContext = HashMap<String, Value>;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthzRequest {
    pub secret_id: String,
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub context: RequestContext,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            policy_id: None,
            statement: None,
        }
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
