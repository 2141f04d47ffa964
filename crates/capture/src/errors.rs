use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("Camera permission denied")]
    Denied,

    #[error("No camera found")]
    NotFound,

    #[error("Camera is busy")]
    Busy,

    #[error("Capture constraints not supported: {0}")]
    Unsupported(String),

    #[error("No frame received within {0:?}")]
    Timeout(Duration),

    #[error("Capture failed: {0}")]
    Other(String),
}

impl AcquireError {
    /// Only a capability mismatch is worth a second attempt with relaxed constraints.
    pub fn warrants_fallback(&self) -> bool {
        matches!(self, AcquireError::Unsupported(_))
    }
}

impl From<io::Error> for AcquireError {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EACCES) | Some(libc::EPERM) => return AcquireError::Denied,
            Some(libc::ENOENT) | Some(libc::ENODEV) | Some(libc::ENXIO) => {
                return AcquireError::NotFound;
            }
            Some(libc::EBUSY) => return AcquireError::Busy,
            Some(libc::EINVAL) | Some(libc::ERANGE) => {
                return AcquireError::Unsupported(err.to_string());
            }
            _ => {}
        }

        match err.kind() {
            io::ErrorKind::PermissionDenied => AcquireError::Denied,
            io::ErrorKind::NotFound => AcquireError::NotFound,
            io::ErrorKind::ResourceBusy => AcquireError::Busy,
            io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported => {
                AcquireError::Unsupported(err.to_string())
            }
            _ => AcquireError::Other(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        assert_eq!(AcquireError::Denied.to_string(), "Camera permission denied");
        assert_eq!(AcquireError::NotFound.to_string(), "No camera found");
        assert_eq!(AcquireError::Busy.to_string(), "Camera is busy");
        assert_eq!(
            AcquireError::Unsupported("1920x1080".to_string()).to_string(),
            "Capture constraints not supported: 1920x1080"
        );
        assert_eq!(
            AcquireError::Timeout(Duration::from_secs(10)).to_string(),
            "No frame received within 10s"
        );
    }

    #[test]
    fn test_only_unsupported_warrants_fallback() {
        assert!(AcquireError::Unsupported(String::new()).warrants_fallback());
        assert!(!AcquireError::Denied.warrants_fallback());
        assert!(!AcquireError::NotFound.warrants_fallback());
        assert!(!AcquireError::Busy.warrants_fallback());
        assert!(!AcquireError::Timeout(Duration::from_secs(1)).warrants_fallback());
        assert!(!AcquireError::Other(String::new()).warrants_fallback());
    }

    #[test]
    fn test_conversion_from_os_errors() {
        let cases = [
            (libc::EACCES, AcquireError::Denied),
            (libc::ENOENT, AcquireError::NotFound),
            (libc::ENODEV, AcquireError::NotFound),
            (libc::EBUSY, AcquireError::Busy),
        ];
        for (code, expected) in cases {
            let err: AcquireError = io::Error::from_raw_os_error(code).into();
            assert_eq!(err, expected, "errno {}", code);
        }

        let err: AcquireError = io::Error::from_raw_os_error(libc::EINVAL).into();
        assert!(err.warrants_fallback());
    }

    #[test]
    fn test_conversion_from_error_kinds() {
        let err: AcquireError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert_eq!(err, AcquireError::Denied);

        let err: AcquireError = io::Error::other("wedged").into();
        assert_eq!(err, AcquireError::Other("wedged".to_string()));
    }
}
