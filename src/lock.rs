use std::sync::{Mutex, MutexGuard};

/// Take the lock even if a capture or playback thread panicked while holding it.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            crate::log_debug(&format!("Mutex poisoned in {context}; recovering"));
            tracing::warn!(context, "mutex poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn recovers_poisoned_mutex() {
        let lock = Arc::new(Mutex::new(7u32));
        let cloned = lock.clone();
        let _ = std::thread::spawn(move || {
            let _guard = cloned.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(lock.is_poisoned());
        assert_eq!(*lock_or_recover(&lock, "test"), 7);
    }
}
