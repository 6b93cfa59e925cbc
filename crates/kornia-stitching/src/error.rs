use thiserror::Error;

/// Error reported by the native library through its exception status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("native call `{call}` failed with status {code}: {message}")]
pub struct NativeError {
    /// Name of the native entry point that reported the failure.
    pub call: &'static str,
    /// Raw status code returned by the entry point.
    pub code: i32,
    /// Human readable description of the failure.
    pub message: String,
}

impl NativeError {
    /// Creates a new native error.
    pub fn new(call: &'static str, code: i32, message: impl Into<String>) -> Self {
        Self {
            call,
            code,
            message: message.into(),
        }
    }
}

/// An error type for the stitching bindings.
#[derive(Debug, Error, PartialEq)]
pub enum StitchingError {
    /// A required argument is empty or references a resource that cannot be used.
    ///
    /// Detected before any native call is made.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The native library reported a failure.
    ///
    /// No output collection is modified when this error is returned.
    #[error("Native failure (status {code}): {message}")]
    NativeFailure {
        /// Status code returned by the native entry point.
        code: i32,
        /// Message describing the failure.
        message: String,
    },

    /// A resource was used or released after its ownership was already given up.
    #[error("Resource already released: {0}")]
    ResourceAlreadyReleased(&'static str),
}

impl From<NativeError> for StitchingError {
    fn from(e: NativeError) -> Self {
        StitchingError::NativeFailure {
            code: e.code,
            message: format!("{}: {}", e.call, e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_error_into_failure() {
        let err: StitchingError = NativeError::new("stitching_Estimator_apply", 1, "boom").into();
        assert_eq!(
            err,
            StitchingError::NativeFailure {
                code: 1,
                message: "stitching_Estimator_apply: boom".to_string(),
            }
        );
        assert_eq!(
            err.to_string(),
            "Native failure (status 1): stitching_Estimator_apply: boom"
        );
    }
}
