//! Error types for the certificate-issuance engine.
//!
//! The variants mirror the domain-level error kinds rather than any one
//! library's type names: lower layers never collapse them into a generic
//! "it failed", because upper layers (the protocol engine, the dispatcher)
//! dispatch on which kind they got.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The attribute or field a failure can be pinned to, when identifiable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorLocus {
    /// The outer signed envelope / signer certificate.
    OuterSignature,
    /// The inner enveloped-data (encrypted) payload.
    InnerEnvelope,
    /// The PKCS#10 `challengePassword` attribute.
    ChallengePassword,
    /// The SCEP transaction ID / PKI-user lookup key.
    TransactionId,
    /// The SCEP nonce (sender or recipient).
    Nonce,
    /// A certificate's subject or issuer distinguished name.
    DistinguishedName,
    /// A certificate's validity window.
    Validity,
    /// A certificate extension.
    Extension,
    /// The embedded public key / SubjectPublicKeyInfo.
    PublicKey,
    /// No specific attribute could be identified.
    Unknown,
}

/// Further classification of why `ErrorLocus` was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorType {
    /// An attribute was present where it should have been absent.
    AttrPresent,
    /// A required attribute was absent.
    AttrAbsent,
    /// An attribute carried an unacceptable value.
    AttrValue,
    /// An attribute's size was out of bounds.
    AttrSize,
    /// A general constraint was violated.
    Constraint,
    /// An issuer-imposed constraint was violated.
    IssuerConstraint,
}

/// Main error type for the certificate-issuance engine.
///
/// Kinds follow spec §7: `BadData`/`Underflow`/`Overflow` are parse- and
/// buffer-level; `Signature`/`Invalid`/`Failed` are post-parse semantic
/// rejections; `Permission`/`NotInited`/`NotFound`/`Inited`/`Duplicate` are
/// object-state violations; `EnvelopeResource` is not a failure, it tells
/// the caller the deenveloping state machine needs more key material.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed wire data detected while parsing ASN.1/BER/DER.
    #[error("malformed data{}", locus_suffix(.locus))]
    BadData {
        /// Human-readable detail.
        detail: String,
        /// Attribute implicated, if known.
        locus: Option<(ErrorLocus, ErrorType)>,
    },

    /// The input buffer ran out before the current operation could complete.
    /// Recoverable at the envelope layer: the caller refills and retries.
    #[error("buffer underflow: needed {needed} bytes, had {available}")]
    Underflow {
        /// Bytes required to make progress.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// A write would have overrun the destination buffer.
    #[error("buffer overflow: {0}")]
    Overflow(String),

    /// Authenticated verification failed (including algorithm mismatch and
    /// keyID-confirmed wrong-signer).
    #[error("signature verification failed: {0}")]
    Signature(String),

    /// An attribute required for the current operation is absent.
    #[error("not initialised: {0}")]
    NotInited(String),

    /// A lookup (by identifier, by handle) found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// An attribute is already present where the object expects a single value.
    #[error("already initialised: {0}")]
    Inited(String),

    /// A single-valued attribute was written twice.
    #[error("duplicate attribute: {0}")]
    Duplicate(String),

    /// The action is not allowed in the object's current state (e.g.
    /// writing to a signed, immutable certificate).
    #[error("permission denied: {0}")]
    Permission(String),

    /// Not a failure: the deenveloping state machine needs a recipient key
    /// before it can continue. The caller should attempt a recipient match.
    #[error("envelope needs key material: {0}")]
    EnvelopeResource(String),

    /// Transport-level timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Transport read failure.
    #[error("transport read error: {0}")]
    Read(String),

    /// Transport write failure.
    #[error("transport write error: {0}")]
    Write(String),

    /// Transport/session open failure.
    #[error("transport open error: {0}")]
    Open(String),

    /// Semantic rejection after successful parsing (revoked, constraints
    /// violated, profile irreconcilable with request).
    #[error("invalid: {0}")]
    Invalid(String),

    /// Catch-all for impossibilities: a side-channel self-check mismatch,
    /// an `unreachable!()` converted at the dispatcher boundary.
    #[error("operation failed: {0}")]
    Failed(String),

    /// RSA primitive error.
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// IO error from the transport boundary.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Acquiring a handle whose underlying object has already been
    /// destroyed (spec §5's resource-registry rule).
    #[error("signalled: {0}")]
    Signalled(String),
}

fn locus_suffix(locus: &Option<(ErrorLocus, ErrorType)>) -> String {
    match locus {
        Some((l, t)) => format!(" ({l:?}/{t:?})"),
        None => String::new(),
    }
}

impl CoreError {
    /// Construct a `BadData` error with no implicated attribute.
    pub fn bad_data(detail: impl Into<String>) -> Self {
        CoreError::BadData { detail: detail.into(), locus: None }
    }

    /// Construct a `BadData` error pinned to an attribute.
    pub fn bad_data_at(detail: impl Into<String>, locus: ErrorLocus, kind: ErrorType) -> Self {
        CoreError::BadData { detail: detail.into(), locus: Some((locus, kind)) }
    }

    /// True if this is the "need more key material" signal rather than a
    /// real failure.
    pub fn is_envelope_resource(&self) -> bool {
        matches!(self, CoreError::EnvelopeResource(_))
    }

    /// Recode a `BadData` into a `Signature` failure, or vice versa, per
    /// the keyID-disambiguation rule in spec §4.6. Used by the signature
    /// engine after consulting `authorityKeyIdentifier`/`subjectKeyIdentifier`.
    pub fn recode_as_signature(self, detail: impl Into<String>) -> Self {
        match self {
            CoreError::BadData { .. } => CoreError::Signature(detail.into()),
            other => other,
        }
    }
}
