//! # Utility Functions Module
//!
//! Helpers for building external tool command lines.

/// Macro for building argument vectors out of mixed flags and paths.
///
/// Tool arguments mix flags (`&str`) with file paths (`&Path`), and paths are
/// not guaranteed to be valid UTF-8, so arguments are kept as `OsString`
/// instead of going through `to_string_lossy`. Each item only needs to be
/// convertible with `OsString::from`.
///
/// # Example
/// ```rust
/// use picopt::os_args;
/// use std::path::Path;
///
/// let out = Path::new("out.png");
/// let args = os_args!["-o6", "-out", out];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! os_args {
    [$($item:expr),* $(,)?] => {
        vec![$(::std::ffi::OsString::from($item)),*]
    };
}
