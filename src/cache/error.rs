use thiserror::Error;

/// Boxed error used to carry producer failures through `CacheError`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// A value exists for the key but was stored with another type.
    #[error(
        "cached value for key `{key}` in region `{region}` is of type {actual} instead of {expected}"
    )]
    TypeMismatch {
        key: String,
        region: String,
        expected: &'static str,
        actual: &'static str,
    },
    /// A producer failed; for callers without an error type of their own.
    #[error("cache value producer failed: {0}")]
    Producer(#[source] BoxError),
}

impl CacheError {
    pub fn producer(error: impl Into<BoxError>) -> Self {
        Self::Producer(error.into())
    }

    pub(crate) fn type_mismatch(
        key: &str,
        region: &str,
        expected: &'static str,
        actual: &'static str,
    ) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            region: region.to_string(),
            expected,
            actual,
        }
    }
}
