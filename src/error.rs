/// Failures callers are expected to tell apart.
///
/// These travel inside `anyhow::Error`; use `err.downcast_ref::<StoreError>()`
/// to recover the variant. Missing records are not errors: lookups and
/// mutations report them as `None` / `false`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("remote request failed: {0}")]
    Remote(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote(message.into())
    }
}

/// Returns the [`StoreError`] carried by `err`, if any.
pub fn store_error(err: &anyhow::Error) -> Option<&StoreError> {
    err.downcast_ref::<StoreError>()
}
