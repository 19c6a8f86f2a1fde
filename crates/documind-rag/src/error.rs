//! Error types for the RAG pipeline
//!
//! Provider failures are classified as transient or structural. Transient
//! failures are retried and then routed to a fallback provider; structural
//! failures surface to the caller immediately.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for crate-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Failure reported by a pluggable provider (embedding, vector store, reranker, LLM)
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("{provider} timed out after {elapsed:?}")]
    Timeout { provider: String, elapsed: Duration },

    #[error("{provider} rate limited the request")]
    RateLimited { provider: String },

    #[error("{provider} unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("{provider} returned a malformed response: {message}")]
    Malformed { provider: String, message: String },

    #[error("{provider} rejected the request: {message}")]
    Rejected { provider: String, message: String },

    /// Non-success HTTP status other than 429
    #[error("{provider} returned HTTP {status}: {message}")]
    Http {
        provider: String,
        status: u16,
        message: String,
    },
}

impl ProviderError {
    /// Whether retrying the same call can reasonably succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Unavailable { .. }
            | Self::Malformed { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408,
            Self::Rejected { .. } => false,
        }
    }

    pub fn unavailable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn malformed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn rejected(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Classify a reqwest failure
    pub fn from_http(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout {
                provider: provider.to_string(),
                elapsed: Duration::ZERO,
            };
        }
        if err.is_decode() {
            return Self::malformed(provider, err.to_string());
        }
        match err.status() {
            Some(status) => Self::from_status(provider, status, &err.to_string()),
            None => Self::unavailable(provider, err.to_string()),
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited {
                provider: provider.to_string(),
            }
        } else {
            Self::Http {
                provider: provider.to_string(),
                status: status.as_u16(),
                message: body.to_string(),
            }
        }
    }
}

/// Embedding gateway failures
#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    #[error("all embedding providers exhausted after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: ProviderError },

    /// Every input in the batch was empty, so nothing was sent to a provider
    #[error("embedding input skipped: all {count} texts were empty")]
    EmptyInputSkipped { count: usize },
}

/// Ingestion failures
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("document {0} is empty after normalization")]
    EmptyDocument(Uuid),

    #[error("chunking failed for document {document_id}: {reason}")]
    ChunkingFailed { document_id: Uuid, reason: String },

    #[error("document {0} is already ingested; delete it before re-ingesting")]
    AlreadyIngested(Uuid),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("indexing failed for document {document_id}: {source}")]
    IndexingFailed {
        document_id: Uuid,
        #[source]
        source: ProviderError,
    },
}

/// Pipeline stage that produced a query failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStage {
    Retrieval,
    Generation,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieval => write!(f, "retrieval"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

/// Best-matching passage returned when no generation provider answered
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DegradedAnswer {
    pub chunk_id: Uuid,
    pub snippet: String,
}

/// Query failures
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("[retrieval] document {0} not found")]
    DocumentNotFound(Uuid),

    #[error("[retrieval] question is empty")]
    EmptyQuestion,

    #[error("[retrieval] no relevant content in document {0}")]
    NoRelevantContent(Uuid),

    #[error("[generation] answer generation unavailable: {last}")]
    GenerationUnavailable {
        last: ProviderError,
        degraded: Option<DegradedAnswer>,
    },

    #[error("[{stage}] query cancelled")]
    Cancelled { stage: QueryStage },
}

impl QueryError {
    /// Stage of the pipeline that failed
    pub fn stage(&self) -> QueryStage {
        match self {
            Self::DocumentNotFound(_) | Self::EmptyQuestion | Self::NoRelevantContent(_) => {
                QueryStage::Retrieval
            }
            Self::GenerationUnavailable { .. } => QueryStage::Generation,
            Self::Cancelled { stage } => *stage,
        }
    }

    /// The non-generative fallback answer, if one was produced
    pub fn degraded_answer(&self) -> Option<&DegradedAnswer> {
        match self {
            Self::GenerationUnavailable { degraded, .. } => degraded.as_ref(),
            _ => None,
        }
    }
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited {
            provider: "x".into()
        }
        .is_transient());
        assert!(ProviderError::unavailable("x", "down").is_transient());
        assert!(!ProviderError::rejected("x", "bad key").is_transient());
    }

    #[test]
    fn test_status_classification() {
        let e = ProviderError::from_status("x", reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert!(matches!(e, ProviderError::RateLimited { .. }));
        let e = ProviderError::from_status("x", reqwest::StatusCode::BAD_GATEWAY, "");
        assert!(e.is_transient());
        let e = ProviderError::from_status("x", reqwest::StatusCode::REQUEST_TIMEOUT, "");
        assert!(e.is_transient());
        let e = ProviderError::from_status("x", reqwest::StatusCode::UNAUTHORIZED, "bad key");
        assert!(!e.is_transient());
        assert!(matches!(e, ProviderError::Http { status: 401, .. }));
        assert_eq!(e.to_string(), "x returned HTTP 401: bad key");
    }

    #[test]
    fn test_query_error_reports_stage() {
        let id = Uuid::new_v4();
        assert_eq!(QueryError::NoRelevantContent(id).stage(), QueryStage::Retrieval);
        let err = QueryError::GenerationUnavailable {
            last: ProviderError::unavailable("llm", "down"),
            degraded: None,
        };
        assert_eq!(err.stage(), QueryStage::Generation);
        assert!(err.to_string().starts_with("[generation]"));
    }
}
