use crate::{AcquireError, CaptureBackend, CaptureConstraints, ConstraintTier, LiveSource};
use std::sync::Arc;

pub struct Acquired {
    pub source: Arc<dyn LiveSource>,
    pub tier: ConstraintTier,
}

/// Two-tier acquisition: try `preferred`; if the device rejects it as
/// unsupported, call `on_fallback` and try `fallback` exactly once.
/// Every other failure, and any failure of the second attempt, is returned as is.
pub fn acquire_with_fallback<F>(
    backend: &dyn CaptureBackend,
    preferred: &CaptureConstraints,
    fallback: &CaptureConstraints,
    on_fallback: F,
) -> Result<Acquired, AcquireError>
where
    F: FnOnce(&AcquireError),
{
    match backend.acquire(preferred) {
        Ok(source) => Ok(Acquired {
            source,
            tier: ConstraintTier::Preferred,
        }),
        Err(e) if e.warrants_fallback() => {
            tracing::warn!(error = %e, "Preferred capture constraints rejected, retrying with fallback set");
            on_fallback(&e);

            let source = backend.acquire(fallback).inspect_err(|e| {
                tracing::error!(error = %e, "Fallback capture constraints failed");
            })?;

            Ok(Acquired {
                source,
                tier: ConstraintTier::Fallback,
            })
        }
        Err(e) => {
            tracing::error!(error = %e, "Capture acquisition failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticBackend;

    fn acquire(backend: &SyntheticBackend) -> (Result<Acquired, AcquireError>, bool) {
        let mut fallback_seen = false;
        let result = acquire_with_fallback(
            backend,
            &CaptureConstraints::PREFERRED,
            &CaptureConstraints::FALLBACK,
            |_| fallback_seen = true,
        );
        (result, fallback_seen)
    }

    #[test]
    fn preferred_success_makes_one_attempt() {
        let backend = SyntheticBackend::new(640, 480);
        let (result, fallback_seen) = acquire(&backend);

        let acquired = result.unwrap();
        assert_eq!(acquired.tier, ConstraintTier::Preferred);
        assert!(!fallback_seen);
        assert_eq!(backend.attempts(), vec![CaptureConstraints::PREFERRED]);
    }

    #[test]
    fn unsupported_retries_once_with_fallback() {
        let backend = SyntheticBackend::new(640, 480)
            .with_failures([AcquireError::Unsupported("too big".to_string())]);
        let (result, fallback_seen) = acquire(&backend);

        let acquired = result.unwrap();
        assert_eq!(acquired.tier, ConstraintTier::Fallback);
        assert_eq!(acquired.source.dimensions(), (480, 360));
        assert!(fallback_seen);
        assert_eq!(
            backend.attempts(),
            vec![CaptureConstraints::PREFERRED, CaptureConstraints::FALLBACK]
        );
    }

    #[test]
    fn fallback_failure_is_terminal() {
        let backend = SyntheticBackend::new(640, 480).with_failures([
            AcquireError::Unsupported("first".to_string()),
            AcquireError::Unsupported("second".to_string()),
        ]);
        let (result, _) = acquire(&backend);

        assert_eq!(
            result.err(),
            Some(AcquireError::Unsupported("second".to_string()))
        );
        assert_eq!(backend.attempts().len(), 2, "exactly one retry");
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        for failure in [
            AcquireError::Denied,
            AcquireError::NotFound,
            AcquireError::Busy,
        ] {
            let backend = SyntheticBackend::new(640, 480).with_failures([failure.clone()]);
            let (result, fallback_seen) = acquire(&backend);

            assert_eq!(result.err(), Some(failure));
            assert!(!fallback_seen);
            assert_eq!(backend.attempts().len(), 1);
        }
    }
}
