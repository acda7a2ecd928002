//! Invalidation hook for caches keyed on the user's professional path.
//!
//! The session store never reads these caches. It only signals that
//! whatever they hold (category lists, onboarding content) may be stale.

/// Receives "your contents are stale" notifications.
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self);
}

/// Used when nothing downstream caches path-dependent data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self) {}
}

impl<F> CacheInvalidator for F
where
    F: Fn() + Send + Sync,
{
    fn invalidate(&self) {
        self()
    }
}
