use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (weights, thresholds, bounds).
    ConfigValidation(String),
    /// A record is missing a required field. The record is skipped.
    DataIncomplete { record_id: String, field: String },
    /// Transaction graph exceeds the configured edge cap. Aborts L3 only.
    GraphTooLarge { edges: usize, cap: usize },
    /// PageRank hit the iteration cap before converging.
    ConvergenceNotReached { iterations: usize },
    /// Entity id not known to the store.
    UnknownEntity(String),
    /// Return period string could not be parsed.
    InvalidPeriod(String),
    /// Backing store failure.
    Store(String),
    /// IO / CSV error.
    Io(String),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::DataIncomplete { record_id, field } => {
                write!(f, "record '{record_id}': missing or invalid field '{field}'")
            }
            Self::GraphTooLarge { edges, cap } => {
                write!(f, "transaction graph has {edges} edges, cap is {cap}")
            }
            Self::ConvergenceNotReached { iterations } => {
                write!(f, "centrality did not converge within {iterations} iterations")
            }
            Self::UnknownEntity(id) => write!(f, "unknown entity: {id}"),
            Self::InvalidPeriod(p) => {
                write!(f, "invalid return period '{p}' (expected MMYYYY or YYYY-MM)")
            }
            Self::Store(msg) => write!(f, "store error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}

impl From<csv::Error> for ReconError {
    fn from(e: csv::Error) -> Self {
        Self::Io(e.to_string())
    }
}
