use std::path::PathBuf;

use thiserror::Error;

/// Closed set of error codes returned on the wire. Every failure path in the
/// engine classifies into exactly one of these before it reaches a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    EAccessDenied,
    ENotFound,
    ENotFile,
    ENotDirectory,
    ETooLarge,
    EBinaryFile,
    ETimeout,
    EInvalidPattern,
    EInvalidInput,
    EPermissionDenied,
    ESymlinkNotAllowed,
    EPathTraversal,
    EUnknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EAccessDenied => "E_ACCESS_DENIED",
            Self::ENotFound => "E_NOT_FOUND",
            Self::ENotFile => "E_NOT_FILE",
            Self::ENotDirectory => "E_NOT_DIRECTORY",
            Self::ETooLarge => "E_TOO_LARGE",
            Self::EBinaryFile => "E_BINARY_FILE",
            Self::ETimeout => "E_TIMEOUT",
            Self::EInvalidPattern => "E_INVALID_PATTERN",
            Self::EInvalidInput => "E_INVALID_INPUT",
            Self::EPermissionDenied => "E_PERMISSION_DENIED",
            Self::ESymlinkNotAllowed => "E_SYMLINK_NOT_ALLOWED",
            Self::EPathTraversal => "E_PATH_TRAVERSAL",
            Self::EUnknown => "E_UNKNOWN",
        }
    }

    /// A constant suggestion table keyed by code, surfaced to the caller alongside
    /// every error response.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::EAccessDenied => "Use the roots tool to see available paths",
            Self::ENotFound => "Check the path exists with ls or find first",
            Self::ENotFile => "The target is a directory; use ls or tree instead",
            Self::ENotDirectory => "The target is a file; use read instead",
            Self::ETooLarge => "Use read with head/tail/lineStart+lineEnd to read a slice",
            Self::EBinaryFile => "Pass skipBinary: false to read binary content anyway",
            Self::ETimeout => "Narrow the search scope or raise timeoutMs",
            Self::EInvalidPattern => "Check the regex syntax or switch to isLiteral",
            Self::EInvalidInput => "Review the argument schema for this tool",
            Self::EPermissionDenied => "The OS denied access; check file permissions",
            Self::ESymlinkNotAllowed => "The path resolves through a symlink outside allowed roots",
            Self::EPathTraversal => "Remove '..' components from the requested path",
            Self::EUnknown => "An unclassified error occurred; see details",
        }
    }
}

/// Domain error carried through the engine. The wire-level envelope (`to_response`)
/// is built from this; nothing below the tool envelope formats user-facing text
/// directly.
#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct FsError {
    pub code: ErrorCode,
    pub message: String,
    pub path: Option<PathBuf>,
    pub details: Option<String>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            details: None,
            cause: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EAccessDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ENotFound, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EInvalidInput, message)
    }

    pub fn invalid_pattern(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EInvalidPattern, message)
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ETooLarge, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ETimeout, message)
    }

    /// Produce the wire-level error envelope (`structuredContent.error`).
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code.as_str(),
            message: self.message.clone(),
            path: self.path.as_ref().map(|p| p.display().to_string()),
            suggestion: self.code.suggestion(),
            details: self.details.clone(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
    pub path: Option<String>,
    pub suggestion: &'static str,
    pub details: Option<String>,
}

/// Map an OS I/O error to a classified `ErrorCode`. Several of these codes
/// (`ELOOP`, `ENOTEMPTY`, `ENAMETOOLONG`) have no stable `std::io::ErrorKind`
/// variant, so the raw_os_error is consulted via `libc` constants.
pub fn classify_io_error(err: &std::io::Error) -> ErrorCode {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => return ErrorCode::ENotFound,
        ErrorKind::PermissionDenied => return ErrorCode::EPermissionDenied,
        _ => {}
    }

    match err.raw_os_error() {
        Some(code) if code == libc::ENOENT => ErrorCode::ENotFound,
        Some(code) if code == libc::EACCES || code == libc::EPERM => ErrorCode::EPermissionDenied,
        Some(code) if code == libc::ELOOP => ErrorCode::ESymlinkNotAllowed,
        Some(code) if code == libc::ENAMETOOLONG => ErrorCode::EInvalidInput,
        Some(code)
            if code == libc::ETIMEDOUT || code == libc::EMFILE || code == libc::ENFILE =>
        {
            ErrorCode::ETimeout
        }
        Some(code) if code == libc::ENOTDIR => ErrorCode::ENotDirectory,
        Some(code) if code == libc::EISDIR => ErrorCode::ENotFile,
        Some(code) if code == libc::ENOTEMPTY => ErrorCode::ENotDirectory,
        _ => ErrorCode::EUnknown,
    }
}

/// Build a classified `FsError` from an I/O error encountered while handling `path`.
pub fn classify(err: std::io::Error, path: Option<&std::path::Path>) -> FsError {
    let code = classify_io_error(&err);
    let message = err.to_string();
    let mut e = FsError::new(code, message);
    if let Some(p) = path {
        e = e.with_path(p);
    }
    e.with_cause(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_not_found() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert_eq!(classify_io_error(&err), ErrorCode::ENotFound);
    }

    #[test]
    fn classify_permission_denied() {
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(classify_io_error(&err), ErrorCode::EPermissionDenied);
    }

    #[test]
    fn classify_eloop_via_raw_os_error() {
        let err = std::io::Error::from_raw_os_error(libc::ELOOP);
        assert_eq!(classify_io_error(&err), ErrorCode::ESymlinkNotAllowed);
    }

    #[test]
    fn classify_enotempty_via_raw_os_error() {
        let err = std::io::Error::from_raw_os_error(libc::ENOTEMPTY);
        assert_eq!(classify_io_error(&err), ErrorCode::ENotDirectory);
    }

    #[test]
    fn response_carries_suggestion() {
        let err = FsError::access_denied("nope").with_path("/tmp/root/link/hosts");
        let resp = err.to_response();
        assert_eq!(resp.code, "E_ACCESS_DENIED");
        assert!(resp.suggestion.contains("roots"));
        assert_eq!(resp.path.as_deref(), Some("/tmp/root/link/hosts"));
    }
}
