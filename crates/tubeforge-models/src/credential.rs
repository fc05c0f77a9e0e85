//! Provider credentials.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Generation service a credential authenticates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Image generation service (thumbnails, scene stills)
    Image,
    /// Text generation service (scripts, titles, descriptions)
    Text,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Image => "image",
            Provider::Text => "text",
        }
    }

    /// All known providers.
    pub fn all() -> [Provider; 2] {
        [Provider::Image, Provider::Text]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Provider::Image),
            "text" => Ok(Provider::Text),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Unique identifier for a credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CredentialId(pub String);

impl CredentialId {
    /// Generate a new random credential ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CredentialId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An API key (or token) for one provider, plus its health metadata.
///
/// Credentials are created outside the dispatcher (seeded or added by an
/// operator). The dispatcher only ever touches `last_used_at`, `error_count`,
/// `active` and `last_error`.
#[derive(Clone, Serialize, Deserialize, JsonSchema)]
pub struct Credential {
    pub id: CredentialId,

    /// Secret value sent to the provider
    pub secret: String,

    pub provider: Provider,

    /// Inactive credentials are never selected
    #[serde(default = "default_active")]
    pub active: bool,

    /// Number of times this credential was flagged as problematic
    #[serde(default)]
    pub error_count: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    /// Reason given when the credential was last flagged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Credential {
    /// Create a new, active, never-used credential.
    pub fn new(provider: Provider, secret: impl Into<String>) -> Self {
        Self {
            id: CredentialId::new(),
            secret: secret.into(),
            provider,
            active: true,
            error_count: 0,
            last_used_at: None,
            last_error: None,
        }
    }

    /// Set an explicit ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = CredentialId::from_string(id);
        self
    }

    /// Check whether this credential may be handed out for `provider`.
    pub fn is_usable_for(&self, provider: Provider) -> bool {
        self.active && self.provider == provider
    }

    /// Short, log-safe preview of the secret.
    pub fn masked_secret(&self) -> String {
        let chars: Vec<char> = self.secret.chars().collect();
        if chars.len() <= 4 {
            return "****".to_string();
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("****{}", tail)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &self.masked_secret())
            .field("provider", &self.provider)
            .field("active", &self.active)
            .field("error_count", &self.error_count)
            .field("last_used_at", &self.last_used_at)
            .field("last_error", &self.last_error)
            .finish()
    }
}
