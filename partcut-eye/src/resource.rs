//! Scoped per-file buffers
//!
//! Every buffer created while a file moves through the pipeline is wrapped in
//! a [`Transient`] obtained from [`BufferTracker::track`]. The guard is dropped
//! on every exit path, including `?` early returns and unwinding, and the
//! tracker keeps live/created counts so callers can confirm nothing outlived
//! the processing call.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Kind of transient buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Decoded file pixels before orientation correction
    SourceImage,
    /// Orientation-corrected buffer handed to the classifier
    NormalizedImage,
    /// Classifier output
    LabelMap,
    /// Boolean mask for one region
    RegionMask,
    /// Masked cutout for one region, before encoding
    Cutout,
}

impl BufferKind {
    pub const ALL: [BufferKind; 5] = [
        BufferKind::SourceImage,
        BufferKind::NormalizedImage,
        BufferKind::LabelMap,
        BufferKind::RegionMask,
        BufferKind::Cutout,
    ];

    fn index(self) -> usize {
        match self {
            BufferKind::SourceImage => 0,
            BufferKind::NormalizedImage => 1,
            BufferKind::LabelMap => 2,
            BufferKind::RegionMask => 3,
            BufferKind::Cutout => 4,
        }
    }
}

/// Live and lifetime counts of transient buffers
#[derive(Debug, Default)]
pub struct BufferTracker {
    live: [AtomicUsize; 5],
    created: [AtomicUsize; 5],
}

impl BufferTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wrap `value` in a guard that is counted until it is dropped
    pub fn track<T>(self: &Arc<Self>, kind: BufferKind, value: T) -> Transient<T> {
        self.live[kind.index()].fetch_add(1, Ordering::AcqRel);
        self.created[kind.index()].fetch_add(1, Ordering::Relaxed);
        trace!("acquired {:?}", kind);
        Transient {
            value,
            kind,
            tracker: Arc::clone(self),
        }
    }

    /// Buffers of `kind` currently alive
    pub fn live(&self, kind: BufferKind) -> usize {
        self.live[kind.index()].load(Ordering::Acquire)
    }

    /// Buffers of every kind currently alive
    pub fn total_live(&self) -> usize {
        BufferKind::ALL.iter().map(|k| self.live(*k)).sum()
    }

    /// Buffers of `kind` ever created
    pub fn created(&self, kind: BufferKind) -> usize {
        self.created[kind.index()].load(Ordering::Relaxed)
    }

    fn release(&self, kind: BufferKind) {
        self.live[kind.index()].fetch_sub(1, Ordering::AcqRel);
        trace!("released {:?}", kind);
    }
}

/// A tracked buffer, released when dropped
pub struct Transient<T> {
    value: T,
    kind: BufferKind,
    tracker: Arc<BufferTracker>,
}

impl<T> Transient<T> {
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// Release the buffer now instead of at end of scope
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for Transient<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Transient<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Transient<T> {
    fn drop(&mut self) {
        self.tracker.release(self.kind);
    }
}

impl<T: fmt::Debug> fmt::Debug for Transient<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transient")
            .field("kind", &self.kind)
            .field("value", &self.value)
            .finish()
    }
}
