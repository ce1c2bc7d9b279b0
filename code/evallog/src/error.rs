/// Errors from reading and aggregating artifacts.
///
/// A `Malformed` error means an artifact could not be parsed at all.  It is never skipped: it
/// indicates a bug in the capture pipeline, and ingesting around it would shift every later cycle
/// out of alignment.  Per-slot problems (missing redirect, incomplete record, bad outcome) are not
/// errors, they are reported through `gate::Verdict` and recorded in the aggregate.
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed artifact {artifact} at line {line}: {reason}")]
    Malformed {
        artifact: String,
        line: usize,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad query: {0}")]
    Query(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(artifact: &str, line: usize, reason: impl Into<String>) -> Error {
        Error::Malformed {
            artifact: artifact.to_string(),
            line,
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Serialized artifacts that fail to parse are malformed, not generic JSON failures.

    pub fn malformed_json(artifact: &str, e: serde_json::Error) -> Error {
        Error::malformed(artifact, e.line(), e.to_string())
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::Malformed { .. })
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Error {
        Error::Config(e.to_string())
    }
}

#[test]
fn test_error_display() {
    let e = Error::malformed("oidc-eval-60-1-sp-resmon-3.txt", 14, "bad block header");
    assert!(e.is_malformed());
    assert!(e.to_string() == "Malformed artifact oidc-eval-60-1-sp-resmon-3.txt at line 14: bad block header");
    let e: Error = anyhow::anyhow!("no data path").into();
    assert!(!e.is_malformed());
    assert!(e.to_string() == "Configuration error: no data path");
}
