use serde::Serialize;
use thiserror::Error;

/// Rejections raised while normalizing a provider tag payload into a `TagSet`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("tag at position {0} has no key")]
    MissingKey(usize),
    #[error("tag at position {0} has an empty key")]
    EmptyKey(usize),
    #[error("duplicate tag key '{0}'")]
    DuplicateKey(String),
    #[error("malformed tag payload: {0}")]
    Malformed(String),
}

/// Errors reported by a provider call. `NotFound` is the recoverable one.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "message", rename_all = "kebab-case")]
pub enum ProviderError {
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("provider error: {0}")]
    Other(String),
}

impl ProviderError {
    pub fn not_found(msg: impl Into<String>) -> Self { Self::NotFound(msg.into()) }

    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }

    /// Classify an AWS-style error code.
    pub fn from_code(code: &str, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match code {
            "ResourceNotFoundException" | "NotFoundException" | "NoSuchAccessPoint"
            | "NoSuchConfiguration" | "AcceleratorNotFoundException" => Self::NotFound(msg),
            c if c.ends_with("NotFoundFault") => Self::NotFound(msg),
            "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" => Self::AccessDenied(msg),
            "Throttling" | "ThrottlingException" | "TooManyRequestsException" => Self::Throttled(msg),
            "ValidationException" | "InvalidRequestException" => Self::Validation(msg),
            c if c.starts_with("InvalidParameter") => Self::Validation(msg),
            other => Self::Other(format!("{other}: {msg}")),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("dependency cycle detected at '{0}'")]
    Cycle(String),
    #[error("'{node}' depends on unknown '{dependency}'")]
    UnknownDependency { node: String, dependency: String },
    #[error("unknown resource type '{0}'")]
    UnknownKind(String),
    #[error("resource type '{kind}' does not support '{operation}'")]
    Unsupported { kind: String, operation: String },
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),
}

/// Raised when a batch finished with at least one hard failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{action}: {failed} of {total} resources failed; first failure on '{resource}': {source}")]
pub struct BatchError {
    pub action: String,
    pub failed: usize,
    pub total: usize,
    pub resource: String,
    pub source: ProviderError,
}
