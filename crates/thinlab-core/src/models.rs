use serde::{Deserialize, Serialize};

/// Status code of a clone as reported over the API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Creating,
    Ok,
    Resetting,
    Deleting,
    Fatal,
}

impl StatusCode {
    /// Default human-readable message for this code
    pub fn default_message(&self) -> &'static str {
        match self {
            StatusCode::Creating => "Clone is being created.",
            StatusCode::Ok => "Clone is ready to accept connections.",
            StatusCode::Resetting => "Clone is being reset.",
            StatusCode::Deleting => "Clone is being deleted.",
            StatusCode::Fatal => "Cloning failure.",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StatusCode::Creating => "CREATING",
            StatusCode::Ok => "OK",
            StatusCode::Resetting => "RESETTING",
            StatusCode::Deleting => "DELETING",
            StatusCode::Fatal => "FATAL",
        };
        write!(f, "{}", s)
    }
}

/// Status of a clone: machine code plus operator-facing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn new(code: StatusCode) -> Self {
        Self {
            message: code.default_message().to_string(),
            code,
        }
    }
}

/// Connection descriptor of the database exposed by a clone container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub connection_str: String,
    pub host: String,
    pub port: String,
    pub username: String,
    pub password: String,
    pub db_name: String,
}

/// Point-in-time snapshot as reported over the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub created_at: String,
    pub data_state_at: String,
    pub physical_size: u64,
    pub logical_size: u64,
    pub pool: String,
    pub num_clones: usize,
}

/// Size and timing metadata describing a clone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneMetadata {
    /// Bytes diverged from the originating snapshot
    pub clone_diff_size: u64,
    /// Human-readable form of `clone_diff_size`
    #[serde(rename = "cloneDiffSizeHR")]
    pub clone_diff_size_hr: String,
    /// Seconds it took to provision the clone
    pub cloning_time: f64,
    /// Idle minutes before the clone becomes an eviction candidate
    pub max_idle_minutes: u64,
}

/// A writable, isolated database copy derived from a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clone {
    pub id: String,
    pub snapshot: Option<Snapshot>,
    /// Exempts the clone from idle eviction (owned by the cloning service)
    pub protected: bool,
    pub delete_at: String,
    pub created_at: String,
    pub status: Status,
    pub db: Database,
    pub metadata: CloneMetadata,
}
