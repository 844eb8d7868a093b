// crates/sync-engine/src/lifecycle.rs
//! Host foreground/background signal
//!
//! The scheduler pauses while the host is in the background and runs a cycle
//! as soon as it comes back. Hosts feed visibility changes through a
//! [`HostLifecycle`]; [`ManualLifecycle`] is a ready-made one driven by
//! explicit calls.

use tokio::sync::watch;

/// Whether the host application is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

/// Source of visibility changes
pub trait HostLifecycle: Send + Sync {
    /// Returns a receiver that observes every visibility change
    fn subscribe(&self) -> watch::Receiver<Visibility>;
}

/// A host that never goes to the background
#[derive(Debug)]
pub struct AlwaysForeground {
    tx: watch::Sender<Visibility>,
}

impl AlwaysForeground {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Visibility::Foreground);
        Self { tx }
    }
}

impl Default for AlwaysForeground {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifecycle for AlwaysForeground {
    fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

/// Visibility driven by explicit calls from the host
#[derive(Debug)]
pub struct ManualLifecycle {
    tx: watch::Sender<Visibility>,
}

impl ManualLifecycle {
    /// Creates a lifecycle starting in the foreground
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Visibility::Foreground);
        Self { tx }
    }

    /// Reports a visibility change; repeated values are not re-broadcast
    pub fn set(&self, visibility: Visibility) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == visibility {
                false
            } else {
                *current = visibility;
                true
            }
        });
        if changed {
            log::debug!("Host visibility changed to {:?}", visibility);
        }
    }

    /// Host went to the background
    pub fn to_background(&self) {
        self.set(Visibility::Background);
    }

    /// Host came back to the foreground
    pub fn to_foreground(&self) {
        self.set(Visibility::Foreground);
    }

    /// Current visibility
    pub fn current(&self) -> Visibility {
        *self.tx.borrow()
    }
}

impl Default for ManualLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifecycle for ManualLifecycle {
    fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_lifecycle_broadcasts_changes() {
        let lifecycle = ManualLifecycle::new();
        let mut rx = lifecycle.subscribe();
        assert_eq!(*rx.borrow(), Visibility::Foreground);

        lifecycle.to_background();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), Visibility::Background);
        assert_eq!(lifecycle.current(), Visibility::Background);
    }

    #[test]
    fn test_repeated_visibility_is_not_a_change() {
        let lifecycle = ManualLifecycle::new();
        let rx = lifecycle.subscribe();
        lifecycle.to_foreground();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_always_foreground() {
        let lifecycle = AlwaysForeground::new();
        assert_eq!(*lifecycle.subscribe().borrow(), Visibility::Foreground);
    }
}
