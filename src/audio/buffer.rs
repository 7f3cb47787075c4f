//! Lock-free sample ring for handing audio between threads
//!
//! A fixed-capacity SPSC (Single-Producer, Single-Consumer) ring buffer
//! carrying `f32` samples from the capture side to the analysis thread.
//!
//! ## Why not a mutex?
//!
//! The producer side runs either inside the audio driver's callback or in
//! a decode loop that feeds it. A mutex shared with the consumer thread
//! can stall the callback (priority inversion) and cause audible dropouts,
//! so the two sides coordinate only through the write and read cursors,
//! which are atomics published with release stores and observed with
//! acquire loads.
//!
//! ## Contract
//!
//! - `write` is all-or-nothing: a slice that does not fit is rejected as a
//!   whole and counted as one overflow. No partial writes.
//! - `read` returns immediately with whatever is available, possibly
//!   nothing. An empty read against a non-empty request is counted as an
//!   underflow.
//! - Neither side ever blocks, allocates, or spins.
//!
//! Capacity is a power of two so cursor reduction is a mask, and the
//! cursors themselves grow monotonically: `write - read` is always the
//! number of unread samples, at most the capacity.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Wrapper aligning the wrapped value to its own cache line so the two
/// cursors never share one (false sharing between producer and consumer).
#[repr(align(64))]
struct CacheAligned<T>(T);

struct RingCore {
    storage: Box<[UnsafeCell<f32>]>,
    capacity: usize,
    mask: usize,

    write_pos: CacheAligned<AtomicUsize>,
    read_pos: CacheAligned<AtomicUsize>,

    overflows: AtomicU64,
    underflows: AtomicU64,
    samples_written: AtomicU64,
    samples_read: AtomicU64,
}

// Safety: the storage cells are only ever written by the single producer
// in the region between the cursors it owns, and only read by the single
// consumer in its region. The cursor release/acquire pairs order the data
// accesses.
unsafe impl Send for RingCore {}
unsafe impl Sync for RingCore {}

impl RingCore {
    fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two, got {capacity}"
        );

        let storage: Vec<UnsafeCell<f32>> =
            (0..capacity).map(|_| UnsafeCell::new(0.0)).collect();

        Self {
            storage: storage.into_boxed_slice(),
            capacity,
            mask: capacity - 1,
            write_pos: CacheAligned(AtomicUsize::new(0)),
            read_pos: CacheAligned(AtomicUsize::new(0)),
            overflows: AtomicU64::new(0),
            underflows: AtomicU64::new(0),
            samples_written: AtomicU64::new(0),
            samples_read: AtomicU64::new(0),
        }
    }

    #[inline]
    fn write(&self, samples: &[f32]) -> bool {
        let write = self.write_pos.0.load(Ordering::Relaxed);
        let read = self.read_pos.0.load(Ordering::Acquire);

        let used = write.wrapping_sub(read);
        debug_assert!(used <= self.capacity, "cursor invariant violated");

        let free = self.capacity - used;
        if samples.len() > free {
            self.overflows.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        for (i, &sample) in samples.iter().enumerate() {
            let idx = (write + i) & self.mask;
            unsafe {
                *self.storage[idx].get() = sample;
            }
        }

        self.write_pos
            .0
            .store(write.wrapping_add(samples.len()), Ordering::Release);
        self.samples_written
            .fetch_add(samples.len() as u64, Ordering::Relaxed);
        true
    }

    #[inline]
    fn read(&self, out: &mut [f32]) -> usize {
        let read = self.read_pos.0.load(Ordering::Relaxed);
        let write = self.write_pos.0.load(Ordering::Acquire);

        let available = write.wrapping_sub(read);
        let count = out.len().min(available);
        if count == 0 {
            if !out.is_empty() {
                self.underflows.fetch_add(1, Ordering::Relaxed);
            }
            return 0;
        }

        for (i, slot) in out.iter_mut().enumerate().take(count) {
            let idx = (read + i) & self.mask;
            *slot = unsafe { *self.storage[idx].get() };
        }

        self.read_pos
            .0
            .store(read.wrapping_add(count), Ordering::Release);
        self.samples_read
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    #[inline]
    fn available(&self) -> usize {
        let write = self.write_pos.0.load(Ordering::Acquire);
        let read = self.read_pos.0.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

/// Producer half of the sample ring (owned by the capture side).
pub struct SampleProducer {
    core: Arc<RingCore>,
}

impl SampleProducer {
    /// Write a whole slice or nothing.
    ///
    /// Returns `false` when the ring lacks space for the entire slice; the
    /// rejection is counted once on the overflow counter. Safe to call
    /// from an audio callback: no locks, no allocation.
    #[inline]
    pub fn write(&mut self, samples: &[f32]) -> bool {
        self.core.write(samples)
    }

    /// Free space in samples, as seen from the producer side.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.core.capacity - self.core.available()
    }
}

/// Consumer half of the sample ring (owned by the analysis thread).
pub struct SampleConsumer {
    core: Arc<RingCore>,
}

impl SampleConsumer {
    /// Read up to `out.len()` samples, returning how many were copied.
    ///
    /// Never waits: an empty ring yields 0 (counted as an underflow).
    #[inline]
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        self.core.read(out)
    }

    /// Samples currently buffered and unread.
    #[inline]
    pub fn available(&self) -> usize {
        self.core.available()
    }
}

/// Shared read-only view of the ring counters.
///
/// Cloneable and readable from any thread; overflow and underflow are
/// diagnostics, never errors.
#[derive(Clone)]
pub struct RingMonitor {
    core: Arc<RingCore>,
}

impl RingMonitor {
    pub fn overflows(&self) -> u64 {
        self.core.overflows.load(Ordering::Relaxed)
    }

    pub fn underflows(&self) -> u64 {
        self.core.underflows.load(Ordering::Relaxed)
    }

    pub fn samples_written(&self) -> u64 {
        self.core.samples_written.load(Ordering::Relaxed)
    }

    pub fn samples_read(&self) -> u64 {
        self.core.samples_read.load(Ordering::Relaxed)
    }
}

/// Create a matched producer/consumer pair plus a counter monitor.
///
/// `capacity` is in samples and must be a power of two.
pub fn sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer, RingMonitor) {
    let core = Arc::new(RingCore::new(capacity));
    (
        SampleProducer {
            core: Arc::clone(&core),
        },
        SampleConsumer {
            core: Arc::clone(&core),
        },
        RingMonitor { core },
    )
}
