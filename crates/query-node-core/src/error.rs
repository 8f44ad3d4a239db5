//! Error taxonomy for the query pipeline.
//!
//! Every failure that leaves the [`Resolver`](crate::resolver::Resolver) is a
//! [`QueryError`]. Collaborator failures are classified where they happen, so
//! raw transport or decoding errors never cross the resolver boundary.
//!
//! | Variant | Wire type | Retryable |
//! |---------|-----------|-----------|
//! | [`InvalidRequest`](QueryError::InvalidRequest) | `invalid_request_error` | no |
//! | [`NotFound`](QueryError::NotFound) | `not_found` | no |
//! | [`Upstream`](QueryError::Upstream) | `upstream_error` | yes |
//! | [`Configuration`](QueryError::Configuration) | `configuration_error` | no |
//! | [`Internal`](QueryError::Internal) | `internal_error` | no |

use std::fmt;

/// Pipeline stage a failure was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveUrl,
    FileLookup,
    CacheLookup,
    Permission,
    Decrypt,
    Decode,
    Index,
    Search,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ResolveUrl => "resolve_url",
            Stage::FileLookup => "file_lookup",
            Stage::CacheLookup => "cache_lookup",
            Stage::Permission => "permission",
            Stage::Decrypt => "decrypt",
            Stage::Decode => "decode",
            Stage::Index => "index",
            Stage::Search => "search",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{stage} failed: {message}")]
    Upstream { stage: Stage, message: String },

    /// Upstream failure caused by malformed key or credential material.
    #[error("{stage} failed, key material rejected: {message}")]
    Configuration { stage: Stage, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn invalid(message: impl Into<String>) -> Self {
        QueryError::InvalidRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        QueryError::NotFound(message.into())
    }

    pub fn upstream(stage: Stage, message: impl Into<String>) -> Self {
        QueryError::Upstream {
            stage,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        QueryError::Internal(message.into())
    }

    /// Machine-readable `type` used in HTTP error bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            QueryError::InvalidRequest(_) => "invalid_request_error",
            QueryError::NotFound(_) => "not_found",
            QueryError::Upstream { .. } => "upstream_error",
            QueryError::Configuration { .. } => "configuration_error",
            QueryError::Internal(_) => "internal_error",
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    ///
    /// Key-material problems need an operator, so they are not retryable
    /// even though they are upstream failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Upstream { .. })
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            QueryError::Upstream { stage, .. } | QueryError::Configuration { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}

/// Marker a collaborator attaches when an upstream explicitly rejected the
/// key or credential material it was handed.
///
/// ```
/// use query_node_core::{error::classify_failure, KeyRejected, Stage};
///
/// let err = anyhow::Error::new(KeyRejected("gateway refused key".into()));
/// assert_eq!(classify_failure(Stage::Decrypt, &err).error_type(), "configuration_error");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("key material rejected: {0}")]
pub struct KeyRejected(pub String);

/// Words of failure text that point at bad key or credential material
/// rather than an unreachable or misbehaving upstream. Matched as whole
/// words against the root cause only.
const KEY_MATERIAL_MARKERS: &[&str] = &[
    "invalid key",
    "malformed",
    "private key",
    "public key",
    "encryption key",
    "credential",
    "credentials",
    "pem",
    "pkcs",
    "decryption key",
    "bad key",
    "key length",
];

/// Map a collaborator failure observed at `stage` onto the taxonomy.
///
/// A permission or decryption failure becomes [`QueryError::Configuration`]
/// when its chain carries [`KeyRejected`], or when its root cause names
/// broken key material. Context layers are never inspected as text: they
/// hold storage locators and other strings the node does not control.
/// Everything else is a plain [`QueryError::Upstream`].
pub fn classify_failure(stage: Stage, err: &anyhow::Error) -> QueryError {
    let message = format!("{:#}", err);
    let key_stage = matches!(stage, Stage::Permission | Stage::Decrypt);
    let rejected = err.chain().any(|cause| cause.is::<KeyRejected>())
        || mentions_key_material(&err.root_cause().to_string());
    if key_stage && rejected {
        QueryError::Configuration { stage, message }
    } else {
        QueryError::Upstream { stage, message }
    }
}

fn mentions_key_material(message: &str) -> bool {
    let words: Vec<String> = message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    KEY_MATERIAL_MARKERS.iter().any(|marker| {
        let needle: Vec<&str> = marker.split(' ').collect();
        words
            .windows(needle.len())
            .any(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        assert_eq!(
            QueryError::invalid("x").error_type(),
            "invalid_request_error"
        );
        assert_eq!(QueryError::not_found("x").error_type(), "not_found");
        assert_eq!(
            QueryError::upstream(Stage::Decrypt, "x").error_type(),
            "upstream_error"
        );
        assert_eq!(QueryError::internal("x").error_type(), "internal_error");
    }

    #[test]
    fn test_malformed_key_is_configuration_error() {
        let err = anyhow::anyhow!("RSA decryption failed: Malformed PEM private key");
        let classified = classify_failure(Stage::Permission, &err);
        assert_eq!(classified.error_type(), "configuration_error");
        assert!(!classified.is_retryable());
    }

    #[test]
    fn test_transport_failure_is_upstream() {
        let err = anyhow::anyhow!("connection refused");
        let classified = classify_failure(Stage::Permission, &err);
        assert_eq!(
            classified,
            QueryError::upstream(Stage::Permission, "connection refused")
        );
        assert!(classified.is_retryable());
    }

    #[test]
    fn test_key_words_outside_key_stages_stay_upstream() {
        let err = anyhow::anyhow!("malformed response body");
        let classified = classify_failure(Stage::FileLookup, &err);
        assert_eq!(classified.error_type(), "upstream_error");
    }

    #[test]
    fn test_context_chain_is_preserved() {
        let err = anyhow::anyhow!("invalid key length").context("fetching grant");
        let classified = classify_failure(Stage::Permission, &err);
        assert!(classified.to_string().contains("fetching grant"));
        assert!(classified.to_string().contains("invalid key length"));
        assert_eq!(classified.stage(), Some(Stage::Permission));
    }

    #[test]
    fn test_locator_in_context_does_not_classify() {
        // Base58 CIDs can spell "pem" or "pkcs" by accident.
        let err = anyhow::anyhow!("connection refused")
            .context("failed to download https://ipfs.io/ipfs/QmYxPeMa7bq3Zr9");
        let classified = classify_failure(Stage::Decrypt, &err);
        assert_eq!(classified.error_type(), "upstream_error");
        assert!(classified.is_retryable());
        assert!(classified.to_string().contains("QmYxPeMa7bq3Zr9"));
    }

    #[test]
    fn test_markers_match_whole_words_only() {
        let err = anyhow::anyhow!("no route to host pkcs7x.example/QmPemAbc");
        assert_eq!(
            classify_failure(Stage::Decrypt, &err).error_type(),
            "upstream_error"
        );

        let err = anyhow::anyhow!("unsupported PKCS padding");
        assert_eq!(
            classify_failure(Stage::Decrypt, &err).error_type(),
            "configuration_error"
        );
    }

    #[test]
    fn test_key_rejected_marker_classifies_through_context() {
        let err = anyhow::Error::new(KeyRejected("decryption gateway returned 400".into()))
            .context("decrypting https://ipfs.io/ipfs/QmPlain");
        assert_eq!(
            classify_failure(Stage::Decrypt, &err).error_type(),
            "configuration_error"
        );
        assert_eq!(
            classify_failure(Stage::FileLookup, &err).error_type(),
            "upstream_error"
        );
    }
}
