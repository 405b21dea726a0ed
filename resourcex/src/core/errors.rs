use thiserror::Error;

/// Stable failure taxonomy of this crate.
///
/// Fallible operations return [`anyhow::Result`]; errors that programmatic
/// consumers are expected to switch on carry one of these values at the root
/// of the chain. Use [`kind_of`] to recover it through `context` layers.
#[derive(Debug, Error)]
pub enum ResourceXError {
    #[error("empty locator")]
    EmptyLocator,

    #[error("invalid character `{ch}` in locator: `{input}`")]
    InvalidCharacter { ch: char, input: String },

    #[error("empty tag in locator: `{input}`")]
    EmptyTag { input: String },

    #[error("empty name in locator: `{input}`")]
    EmptyName { input: String },

    #[error("blob not found: {digest}")]
    BlobNotFound { digest: String },

    #[error("resource not found: {locator}")]
    ResourceNotFound { locator: String },

    #[error("corrupt archive: {reason}")]
    CorruptArchive { reason: String },

    #[error("corrupt store state: {reason}")]
    CorruptState { reason: String },

    #[error("transport error: {reason}")]
    Transport { reason: String },

    #[error("timed out: {reason}")]
    Timeout { reason: String },

    #[error("registry discovery failed for `{domain}`: {reason}")]
    DiscoveryFailed { domain: String, reason: String },

    #[error("no registries advertised by `{domain}`")]
    EmptyRegistries { domain: String },

    #[error("cannot detect resource type in source: {origin}")]
    Undetectable { origin: String },

    #[error("no loader accepts source: {origin}")]
    NoLoader { origin: String },

    #[error("storage I/O error: {reason}")]
    StorageIo { reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl ResourceXError {
    /// Whether a locator failed to parse. The four parse failures are
    /// distinct kinds, but consumers usually only care that the input string
    /// was bad.
    pub fn is_invalid_locator(&self) -> bool {
        matches!(
            self,
            Self::EmptyLocator
                | Self::InvalidCharacter { .. }
                | Self::EmptyTag { .. }
                | Self::EmptyName { .. }
        )
    }

    /// Whether the resolution pipeline may fall through to its next tier
    /// after this failure. Everything else aborts resolution.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ResourceNotFound { .. } | Self::Transport { .. } | Self::Timeout { .. }
        )
    }
}

/// Recover the taxonomy kind from an [`anyhow::Error`] chain, if any.
pub fn kind_of(err: &anyhow::Error) -> Option<&ResourceXError> {
    err.downcast_ref::<ResourceXError>()
}

/// True iff the error chain bottoms out in a kind the resolution pipeline
/// treats as "try the next tier".
pub fn is_transient(err: &anyhow::Error) -> bool {
    kind_of(err).is_some_and(ResourceXError::is_transient)
}

/// True iff the error chain bottoms out in [`ResourceXError::Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    matches!(kind_of(err), Some(ResourceXError::Cancelled))
}
