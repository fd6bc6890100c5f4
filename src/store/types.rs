//! Session and run records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::logs::LogBuffer;

/// Model providers recognized by the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
    Google,
    Xai,
    Meta,
    Deepseek,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Xai => "xai",
            Provider::Meta => "meta",
            Provider::Deepseek => "deepseek",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "openai" => Ok(Provider::Openai),
            "anthropic" => Ok(Provider::Anthropic),
            "google" => Ok(Provider::Google),
            "xai" => Ok(Provider::Xai),
            "meta" => Ok(Provider::Meta),
            "deepseek" => Ok(Provider::Deepseek),
            other => Err(format!("Unrecognized provider: {}", other)),
        }
    }
}

/// Lifecycle status of a run.
///
/// Forward transitions follow declaration order; `Failed` and `Terminated`
/// are terminal sinks reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Generating,
    Installing,
    Building,
    Starting,
    Healthy,
    Ready,
    Failed,
    Terminated,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Terminated)
    }

    /// Whether a transition from `self` to `next` is permitted
    pub fn allows(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next > *self
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Queued => "queued",
            RunStatus::Generating => "generating",
            RunStatus::Installing => "installing",
            RunStatus::Building => "building",
            RunStatus::Starting => "starting",
            RunStatus::Healthy => "healthy",
            RunStatus::Ready => "ready",
            RunStatus::Failed => "failed",
            RunStatus::Terminated => "terminated",
        };
        write!(f, "{}", name)
    }
}

/// A grouping of runs sharing one prompt
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub prompt: String,
    pub run_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One (prompt, provider, model) triple undergoing the lifecycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub session_id: String,
    pub provider: Provider,
    pub model: String,
    pub status: RunStatus,
    pub port: Option<u16>,
    pub container_id: Option<String>,
    pub internal_url: Option<String>,
    pub error: Option<String>,
    pub logs_install: LogBuffer,
    pub logs_build: LogBuffer,
    pub logs_start: LogBuffer,
    pub logs_error: LogBuffer,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(id: String, session_id: String, provider: Provider, model: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            session_id,
            provider,
            model,
            status: RunStatus::Queued,
            port: None,
            container_id: None,
            internal_url: None,
            error: None,
            logs_install: LogBuffer::new(),
            logs_build: LogBuffer::new(),
            logs_start: LogBuffer::new(),
            logs_error: LogBuffer::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Partial run update, merged field-by-field.
///
/// Used by the PATCH endpoint for orchestrator callbacks in split
/// deployments; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub error: Option<String>,
    pub port: Option<u16>,
    pub container_id: Option<String>,
    pub internal_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(RunStatus::Queued.allows(RunStatus::Generating));
        assert!(RunStatus::Generating.allows(RunStatus::Ready));
        assert!(RunStatus::Queued.allows(RunStatus::Failed));
        assert!(RunStatus::Healthy.allows(RunStatus::Terminated));

        // No backwards transitions
        assert!(!RunStatus::Building.allows(RunStatus::Generating));
        assert!(!RunStatus::Ready.allows(RunStatus::Healthy));

        // Terminal states are sinks
        assert!(!RunStatus::Failed.allows(RunStatus::Queued));
        assert!(!RunStatus::Terminated.allows(RunStatus::Failed));
        assert!(!RunStatus::Failed.allows(RunStatus::Ready));
    }

    #[test]
    fn test_status_display_is_lowercase() {
        assert_eq!(RunStatus::Queued.to_string(), "queued");
        assert_eq!(RunStatus::Ready.to_string(), "ready");
        assert_eq!(RunStatus::Terminated.to_string(), "terminated");
    }

    #[test]
    fn test_provider_serde_round_trip() {
        let provider: Provider = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(provider, Provider::Anthropic);
        assert_eq!(serde_json::to_string(&provider).unwrap(), "\"anthropic\"");
    }

    #[test]
    fn test_run_serializes_camel_case() {
        let run = Run::new(
            "r1".into(),
            "s1".into(),
            Provider::Openai,
            "gpt-4o".into(),
        );
        run.logs_build.append("compiled");

        let value = serde_json::to_value(&run).unwrap();
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["logsBuild"], "compiled");
        assert!(value["containerId"].is_null());
    }
}
