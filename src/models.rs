use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Assessor label used when a stored document carries no usable name.
pub const UNSET_ASSESSOR: &str = "unset";

/// Outcome of a single compliance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CareStatus {
    Done,
    NotDone,
    Na,
}

impl CareStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            CareStatus::Done => "done",
            CareStatus::NotDone => "not_done",
            CareStatus::Na => "na",
        }
    }

    /// Parses a stored value, mapping anything unrecognised to `Na`.
    pub fn from_stored(value: Option<&str>) -> CareStatus {
        value
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(CareStatus::Na)
    }
}

impl fmt::Display for CareStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown care status: {0} (expected done, not_done or na)")]
pub struct ParseCareStatusError(pub String);

impl FromStr for CareStatus {
    type Err = ParseCareStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "done" => Ok(CareStatus::Done),
            "not_done" | "not-done" | "notdone" => Ok(CareStatus::NotDone),
            "na" | "n/a" => Ok(CareStatus::Na),
            _ => Err(ParseCareStatusError(s.to_string())),
        }
    }
}

/// The two checks recorded on every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusField {
    BoneProtection,
    IncontinenceCare,
}

impl StatusField {
    pub const ALL: [StatusField; 2] = [StatusField::BoneProtection, StatusField::IncontinenceCare];

    pub const fn label(self) -> &'static str {
        match self {
            StatusField::BoneProtection => "Bone protection",
            StatusField::IncontinenceCare => "Incontinence care",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationRecord {
    pub id: String,
    pub assessor: String,
    pub bone_protection: CareStatus,
    pub incontinence_care: CareStatus,
    pub notes: String,
    pub assessment_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl EvaluationRecord {
    pub fn status(&self, field: StatusField) -> CareStatus {
        match field {
            StatusField::BoneProtection => self.bone_protection,
            StatusField::IncontinenceCare => self.incontinence_care,
        }
    }
}

/// A date value as it may appear in a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Timestamp(DateTime<Utc>),
    EpochMillis(i64),
    Text(String),
}

/// A document exactly as held by the store; nothing here is guaranteed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvaluation {
    #[serde(default)]
    pub assessor: Option<String>,
    #[serde(default)]
    pub bone_protection: Option<String>,
    #[serde(default)]
    pub incontinence_care: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub assessment_date: Option<RawTimestamp>,
    #[serde(default)]
    pub created_at: Option<RawTimestamp>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Payload for a new evaluation. `created_at` is assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvaluation {
    pub assessor: String,
    pub bone_protection: CareStatus,
    pub incontinence_care: CareStatus,
    pub notes: String,
    pub assessment_date: DateTime<Utc>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlySummary {
    pub month_key: String,
    pub label: String,
    pub total: usize,
    pub done: usize,
    pub not_done: usize,
    pub na: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub done: usize,
    pub not_done: usize,
    pub na: usize,
    pub total: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: CareStatus) {
        match status {
            CareStatus::Done => self.done += 1,
            CareStatus::NotDone => self.not_done += 1,
            CareStatus::Na => self.na += 1,
        }
        self.total += 1;
    }
}
