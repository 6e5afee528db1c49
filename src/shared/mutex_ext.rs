//! Usage: Mutex extension that recovers from poisoning instead of panicking.

use std::sync::{Mutex, MutexGuard};

pub trait MutexExt<T> {
    /// Lock the mutex; a poisoned lock is recovered and logged rather than
    /// propagated, because the guarded tables stay structurally valid.
    fn lock_or_recover(&self) -> MutexGuard<'_, T>;
}

impl<T> MutexExt<T> for Mutex<T> {
    #[track_caller]
    fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        match self.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    mutex_type = std::any::type_name::<T>(),
                    file = loc.file(),
                    line = loc.line(),
                    "mutex poisoned by a panicked thread; recovering"
                );
                poisoned.into_inner()
            }
        }
    }
}
