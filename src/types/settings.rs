use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Per-project feature toggles, persisted as a JSON object.
///
/// Known keys are typed; anything else lands in `extra` and is written back
/// untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default = "default_true", deserialize_with = "loose_bool")]
    pub issue_tracker: bool,

    #[serde(default = "default_true", deserialize_with = "loose_bool")]
    pub pull_requests: bool,

    #[serde(default = "default_true", deserialize_with = "loose_bool")]
    pub project_documentation: bool,

    #[serde(default, deserialize_with = "loose_bool")]
    pub open_metadata_access_to_all: bool,

    #[serde(default, deserialize_with = "loose_bool")]
    pub pull_request_access_only: bool,

    #[serde(
        rename = "Enforce_signed-off_commits_in_pull-request",
        default,
        deserialize_with = "loose_bool"
    )]
    pub enforce_signed_off_commits: bool,

    #[serde(
        rename = "Minimum_score_to_merge_pull-request",
        default = "default_minimum_score",
        deserialize_with = "loose_int"
    )]
    pub minimum_score_to_merge: i64,

    #[serde(
        rename = "Only_assignee_can_merge_pull-request",
        default,
        deserialize_with = "loose_bool"
    )]
    pub only_assignee_can_merge: bool,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

fn default_minimum_score() -> i64 {
    -1
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            issue_tracker: true,
            pull_requests: true,
            project_documentation: true,
            open_metadata_access_to_all: false,
            pull_request_access_only: false,
            enforce_signed_off_commits: false,
            minimum_score_to_merge: default_minimum_score(),
            only_assignee_can_merge: false,
            extra: Map::new(),
        }
    }
}

impl ProjectSettings {
    /// Parses the stored column; `None` or an empty string yields defaults.
    pub fn from_column(raw: Option<&str>) -> serde_json::Result<Self> {
        match raw {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw),
            _ => Ok(Self::default()),
        }
    }

    pub fn to_column(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Settings a fresh fork starts with: the upstream's, minus the issue
    /// tracker and pull requests.
    #[must_use]
    pub fn for_fork(upstream: &ProjectSettings) -> Self {
        Self {
            issue_tracker: false,
            pull_requests: false,
            ..upstream.clone()
        }
    }
}

// Settings saved by older form code may carry "True", "y" or 1 instead of
// a JSON boolean.
fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "y"),
        _ => false,
    })
}

fn loose_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom("score out of range")),
        Value::String(s) if s.trim().is_empty() => Ok(default_minimum_score()),
        Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        Value::Null => Ok(default_minimum_score()),
        other => Err(serde::de::Error::custom(format!(
            "invalid minimum score: {other}"
        ))),
    }
}
