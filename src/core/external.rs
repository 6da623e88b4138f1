use crate::core::error::ServiceError;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Run a blocking call to an external collaborator on its own thread and
/// wait at most `timeout` for the answer.
///
/// On timeout the worker thread is left to finish on its own and its result
/// is discarded; callers fall back to their deterministic path.
pub fn call_with_timeout<T, F>(name: &str, timeout: Duration, call: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("external-{}", name))
        .spawn(move || {
            // The receiver may already have given up.
            let _ = tx.send(call());
        })
        .map_err(|e| ServiceError::Unavailable(format!("cannot spawn worker: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ServiceError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(ServiceError::Disconnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_call_returns_value() {
        let result = call_with_timeout("fast", Duration::from_secs(1), || Ok(42));
        assert_eq!(result, Ok(42));
    }

    #[test]
    fn test_slow_call_times_out() {
        let result: Result<u32, _> = call_with_timeout("slow", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok(1)
        });
        assert!(matches!(result, Err(ServiceError::Timeout(_))));
    }

    #[test]
    fn test_service_error_passes_through() {
        let result: Result<u32, _> = call_with_timeout("down", Duration::from_secs(1), || {
            Err(ServiceError::Unavailable("503".into()))
        });
        assert_eq!(result, Err(ServiceError::Unavailable("503".into())));
    }

    #[test]
    fn test_panicking_call_is_disconnected() {
        let result: Result<u32, _> =
            call_with_timeout("panics", Duration::from_secs(1), || panic!("boom"));
        assert_eq!(result, Err(ServiceError::Disconnected));
    }
}
