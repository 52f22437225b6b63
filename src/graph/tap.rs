//! Observation point on the graph's output bus.
//!
//! The render thread hands every block that leaves the unit chain to the
//! installed [`TapCallback`] before discarding it. The callback runs on the
//! render thread, so it must not block for long.

use std::sync::{Arc, Mutex};

use crate::audio::FrameBlock;

/// Receives each rendered block. Runs on the graph's render thread.
pub type TapCallback = Box<dyn FnMut(&FrameBlock) + Send>;

/// Shared slot holding the current tap, if any.
///
/// Cloning shares the slot: the graph keeps one handle and the render thread
/// another.
#[derive(Clone, Default)]
pub struct TapPoint {
    slot: Arc<Mutex<Option<TapCallback>>>,
}

impl TapPoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `callback`, replacing any previous tap.
    pub fn install(&self, callback: impl FnMut(&FrameBlock) + Send + 'static) {
        let callback: TapCallback = Box::new(callback);
        match self.slot.lock() {
            Ok(mut slot) => *slot = Some(callback),
            Err(poisoned) => *poisoned.into_inner() = Some(callback),
        }
    }

    /// Remove the tap. Returns `true` when one was installed.
    ///
    /// Once this returns the callback will not be invoked again.
    pub fn remove(&self) -> bool {
        match self.slot.lock() {
            Ok(mut slot) => slot.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    pub(crate) fn deliver(&self, block: &FrameBlock) {
        if let Ok(mut slot) = self.slot.lock() {
            if let Some(callback) = slot.as_mut() {
                callback(block);
            }
        }
    }
}

impl std::fmt::Debug for TapPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapPoint")
            .field("installed", &self.is_installed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFormat;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_to_installed_callback() {
        let tap = TapPoint::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        tap.install(move |block| {
            counter.fetch_add(block.frame_count(), Ordering::SeqCst);
        });

        let fmt = AudioFormat::pcm16(8_000.0, 1);
        tap.deliver(&FrameBlock::from_planes(fmt, vec![vec![0.0; 10]]));
        tap.deliver(&FrameBlock::from_planes(fmt, vec![vec![0.0; 5]]));
        assert_eq!(seen.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn removed_tap_sees_nothing() {
        let tap = TapPoint::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        tap.install(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(tap.remove());
        assert!(!tap.remove());
        assert!(!tap.is_installed());

        let fmt = AudioFormat::pcm16(8_000.0, 1);
        tap.deliver(&FrameBlock::from_planes(fmt, vec![vec![0.0; 10]]));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clones_share_the_slot() {
        let tap = TapPoint::new();
        let other = tap.clone();
        tap.install(|_| {});
        assert!(other.is_installed());
    }
}
