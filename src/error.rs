//! Error types for season loading, fitting and decoding.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HmmError>;

/// A single row that could not be turned into a feature vector.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RecordError {
    /// 1-based line number in the upload (the header is line 1)
    pub row: usize,
    pub field: String,
    pub reason: String,
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}: field '{}' {}", self.row, self.field, self.reason)
    }
}

#[derive(Error, Debug)]
pub enum HmmError {
    /// A required field is missing or not numeric
    #[error("malformed record at row {}: field '{}' {}", .0.row, .0.field, .0.reason)]
    MalformedRecord(RecordError),

    /// Every malformed row of an upload, when the row policy rejects it
    #[error("{} malformed record(s): {}", .0.len(), join_records(.0))]
    MalformedRecords(Vec<RecordError>),

    #[error("invalid state count {0}: must be between {min} and {max}", min = crate::ml::hmm::MIN_STATES, max = crate::ml::hmm::MAX_STATES)]
    InvalidStateCount(usize),

    #[error("no usable games in the observation sequence")]
    EmptySequence,

    /// Every path became impossible at `step`
    #[error("every state assigns zero density to the observation at step {step}")]
    DegenerateEmission { step: usize },

    /// Likelihood went down during EM, which points at a numeric bug
    #[error("log-likelihood decreased at iteration {iteration}: {previous:.6} -> {current:.6}")]
    NonConvergent {
        iteration: usize,
        previous: f64,
        current: f64,
    },

    #[error("dimension mismatch: expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("length mismatch: state path has {path} entries, posterior table has {posteriors}")]
    LengthMismatch { path: usize, posteriors: usize },

    #[error("invalid model parameters: {0}")]
    InvalidParameters(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A background fit panicked or was aborted
    #[error("fit task failed: {0}")]
    TaskFailed(String),
}

impl HmmError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            HmmError::MalformedRecord(_) => "malformed_record",
            HmmError::MalformedRecords(_) => "malformed_records",
            HmmError::InvalidStateCount(_) => "invalid_state_count",
            HmmError::EmptySequence => "empty_sequence",
            HmmError::DegenerateEmission { .. } => "degenerate_emission",
            HmmError::NonConvergent { .. } => "non_convergent",
            HmmError::DimensionMismatch { .. } => "dimension_mismatch",
            HmmError::LengthMismatch { .. } => "length_mismatch",
            HmmError::InvalidParameters(_) => "invalid_parameters",
            HmmError::Io(_) => "io",
            HmmError::Csv(_) => "csv",
            HmmError::TaskFailed(_) => "task_failed",
        }
    }

    /// Errors caused by the caller's input rather than by the engine
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            HmmError::MalformedRecord(_)
                | HmmError::MalformedRecords(_)
                | HmmError::InvalidStateCount(_)
                | HmmError::EmptySequence
                | HmmError::DimensionMismatch { .. }
                | HmmError::Csv(_)
        )
    }
}

fn join_records(records: &[RecordError]) -> String {
    records
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_records_lists_every_row() {
        let err = HmmError::MalformedRecords(vec![
            RecordError {
                row: 3,
                field: "GoalsFor".to_string(),
                reason: "is not a number: 'x'".to_string(),
            },
            RecordError {
                row: 7,
                field: "Opponent".to_string(),
                reason: "is missing".to_string(),
            },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 malformed record(s)"));
        assert!(msg.contains("row 3"));
        assert!(msg.contains("row 7"));
        assert_eq!(err.kind(), "malformed_records");
    }

    #[test]
    fn test_invalid_state_count_message() {
        let err = HmmError::InvalidStateCount(6);
        assert_eq!(err.to_string(), "invalid state count 6: must be between 2 and 5");
        assert!(err.is_input_error());
    }
}
