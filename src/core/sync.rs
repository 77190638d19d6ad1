//! Synchronization utilities for robust lock handling
//!
//! Converts poisoned std locks into application errors so a panic in one
//! task surfaces as a store failure instead of cascading panics.

use std::sync::LockResult;

/// Handle poisoned mutex cases with consistent error handling
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use jobqueue::core::sync::handle_mutex_poison;
/// use jobqueue::queue::api::StoreError;
///
/// let mutex = Mutex::new(42);
/// let guard = handle_mutex_poison(mutex.lock(), StoreError::Inconsistent).unwrap();
/// assert_eq!(*guard, 42);
/// ```
pub fn handle_mutex_poison<T, E>(
    result: LockResult<T>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<T, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "internal synchronisation error (mutex poisoned by a panic while locked): {:?}",
            poison_err
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[derive(Debug, PartialEq)]
    struct TestError {
        message: String,
    }

    #[test]
    fn test_handle_mutex_poison_success() {
        let mutex = Mutex::new(7);
        let guard = handle_mutex_poison(mutex.lock(), |message| TestError { message }).unwrap();
        assert_eq!(*guard, 7);
    }

    #[test]
    fn test_handle_mutex_poison_with_poisoned_mutex() {
        let mutex = Arc::new(Mutex::new(42));
        let mutex_clone = Arc::clone(&mutex);

        let _ = thread::spawn(move || {
            let _guard = mutex_clone.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        let result = handle_mutex_poison(mutex.lock(), |message| TestError { message });
        let error = result.unwrap_err();
        assert!(error.message.contains("mutex poisoned"));
    }
}
