//! Result type definition and extension traits.
//!
//! Provides combinators for call sites that log a failure and carry on
//! instead of propagating it.

use crate::error::Error;

/// The standard Result type for sluice operations.
///
/// # Examples
///
/// ```ignore
/// fn first_pod(cache: &Cache<Pod>) -> Result<Vec<Arc<Pod>>> {
///     let pods = cache.by_index(NAMESPACE_INDEX, "default")?;
///     Ok(pods)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self) -> Option<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "Operation failed");
                None
            }
        }
    }
}
