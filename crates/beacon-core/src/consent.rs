use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Evaluated analytics consent.
///
/// `Expired` is never persisted; it is derived from a stored grant whose
/// timestamp is older than the validity window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConsentState {
    NotRequested,
    Granted { at: DateTime<Utc> },
    Denied,
    Expired,
}

impl ConsentState {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    /// Short label for logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotRequested => "not_requested",
            Self::Granted { .. } => "granted",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

/// An explicit consent decision, the only thing that is persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentDecision {
    Granted,
    Denied,
}

impl ConsentDecision {
    pub fn from_granted(granted: bool) -> Self {
        if granted {
            Self::Granted
        } else {
            Self::Denied
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl std::fmt::Display for ConsentDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsentDecision {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            other => Err(format!("unknown consent decision: {other}")),
        }
    }
}

/// The surface that asks the player for consent (a dialog, a settings toggle,
/// a platform prompt). Resolves once the player has answered.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn request(&self) -> bool;
}
