//! Helper macros used across the crate.

/// Returns early with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of
/// panicking.
///
/// ```ignore
/// ensure!(header_count <= self.max_headers, ParseError::too_many_headers(self.max_headers));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
