use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GradeError>;

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("unknown occasion: {occasion}")]
    UnknownOccasion { occasion: String },

    #[error("occasion {occasion} has no configuration for group {class_group}")]
    InvalidOccasionGroup {
        occasion: String,
        class_group: String,
    },

    #[error("composite {sid} collides with a subject id")]
    BadCompositeSid { sid: String },

    #[error("calculated field {sid} collides with a subject or composite id")]
    BadCalculateSid { sid: String },

    #[error("class {class} references undefined composite {sid}")]
    UnknownComposite { class: String, sid: String },

    #[error("class {class} references undefined calculated field {sid}")]
    UnknownCalculate { class: String, sid: String },

    #[error("{sid} is a component of both {first} and {second}")]
    ComponentNotUnique {
        sid: String,
        first: String,
        second: String,
    },

    #[error("unknown computation function {name} (used by {sid})")]
    UnknownFunction { sid: String, name: String },

    #[error("no stored pupil grades for {occasion} / {class_group}")]
    NoPupilGrades {
        occasion: String,
        class_group: String,
    },

    #[error("invalid grade {grade:?} for {pid}/{sid}")]
    InvalidGrade {
        pid: String,
        sid: String,
        grade: String,
    },

    #[error("conflicting grades for {pid}/{sid}: {first_grade:?} in {first_file:?}, {second_grade:?} in {second_file:?}")]
    GradeConflict {
        pid: String,
        sid: String,
        first_grade: String,
        first_file: PathBuf,
        second_grade: String,
        second_file: PathBuf,
    },

    #[error("{path:?}: school year {found:?}, expected {expected:?}")]
    TableYearMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("{path:?}: class group {found:?}, expected {expected:?}")]
    TableClassMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("{path:?}: occasion {found:?}, expected {expected:?}")]
    TableTermMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("{value:?} is not a valid date for {field}")]
    InvalidDate { field: String, value: String },

    #[error("{field} is not a field of this grade table")]
    UnknownField { field: String },

    #[error("{path:?}: {reason}")]
    BadFile { path: PathBuf, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Bug(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GradeError {
    pub fn bug(message: impl Into<String>) -> Self {
        Self::Bug(message.into())
    }

    /// Stable code used in IPC error replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownOccasion { .. } => "unknown_occasion",
            Self::InvalidOccasionGroup { .. } => "invalid_occasion_group",
            Self::BadCompositeSid { .. } => "bad_composite_sid",
            Self::BadCalculateSid { .. } => "bad_calculate_sid",
            Self::UnknownComposite { .. } => "unknown_composite",
            Self::UnknownCalculate { .. } => "unknown_calculate",
            Self::ComponentNotUnique { .. } => "component_not_unique",
            Self::UnknownFunction { .. } => "unknown_function",
            Self::NoPupilGrades { .. } => "no_pupil_grades",
            Self::InvalidGrade { .. } => "invalid_grade",
            Self::GradeConflict { .. } => "grade_conflict",
            Self::TableYearMismatch { .. } => "table_year_mismatch",
            Self::TableClassMismatch { .. } => "table_class_mismatch",
            Self::TableTermMismatch { .. } => "table_term_mismatch",
            Self::InvalidDate { .. } => "invalid_date",
            Self::UnknownField { .. } => "unknown_field",
            Self::BadFile { .. } => "bad_file",
            Self::NotFound(_) => "not_found",
            Self::Bug(_) => "bug",
            Self::Store(_) => "db_query_failed",
            Self::Io(_) => "io_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::GradeConflict {
                pid,
                sid,
                first_file,
                second_file,
                ..
            } => Some(json!({
                "pid": pid,
                "sid": sid,
                "files": [first_file.to_string_lossy(), second_file.to_string_lossy()],
            })),
            Self::TableYearMismatch { path, .. }
            | Self::TableClassMismatch { path, .. }
            | Self::TableTermMismatch { path, .. }
            | Self::BadFile { path, .. } => Some(json!({ "path": path.to_string_lossy() })),
            Self::InvalidGrade { pid, sid, grade } => {
                Some(json!({ "pid": pid, "sid": sid, "grade": grade }))
            }
            _ => None,
        }
    }
}
