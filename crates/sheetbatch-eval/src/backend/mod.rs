//! The compute backend seam.
//!
//! A backend receives one call per signature group and operation: every
//! argument is a [`Column`] holding one value per formula instance, and the
//! result must be a column of the same length. Backends are driven through
//! [`ExclusiveBackend`], which serializes calls so a backend never sees two
//! batches at once.

pub(crate) mod cpu;
mod named;
mod operand;
mod stats;

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use sheetbatch_common::TaggedValue;

use crate::repository::RangeRepository;

pub use cpu::{CpuBackend, DEFAULT_MC_PATHS};
pub use named::{MAX_SAMPLES, MAX_STEPS};
pub use operand::Operand;
pub use stats::{norm_cdf, std_normal};

/// One value per formula instance.
pub type Column = Vec<TaggedValue>;

/// A batched operation over `instances` formula instances.
#[derive(Debug, Clone, Copy)]
pub struct BatchRequest<'a> {
    pub op: &'a str,
    /// `args[p][n]` is argument `p` of instance `n`.
    pub args: &'a [Column],
    pub instances: usize,
    /// Resolves memoized-range arguments.
    pub ranges: &'a RangeRepository,
}

impl<'a> BatchRequest<'a> {
    pub fn new(op: &'a str, args: &'a [Column], instances: usize, ranges: &'a RangeRepository) -> Self {
        Self {
            op,
            args,
            instances,
            ranges,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

pub trait ComputeBackend: Send {
    fn name(&self) -> &str;

    /// Formula path. Unknown operations yield `#@@CU_1` per instance.
    fn compute_batched(&mut self, request: BatchRequest<'_>) -> Column;

    /// Named-operation path. Unknown names yield `#@@CU_2` per instance.
    fn compute_named(&mut self, request: BatchRequest<'_>) -> Column;
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn compute_batched(&mut self, request: BatchRequest<'_>) -> Column {
        (**self).compute_batched(request)
    }

    fn compute_named(&mut self, request: BatchRequest<'_>) -> Column {
        (**self).compute_named(request)
    }
}

/// Exclusive access to a backend: acquire, submit, copy results, release.
pub struct ExclusiveBackend<B> {
    inner: Mutex<B>,
    calls: AtomicUsize,
}

impl<B: ComputeBackend> ExclusiveBackend<B> {
    pub fn new(backend: B) -> Self {
        Self {
            inner: Mutex::new(backend),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn compute_batched(&self, request: BatchRequest<'_>) -> Column {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut backend = self.inner.lock();
        backend.compute_batched(request)
    }

    pub fn compute_named(&self, request: BatchRequest<'_>) -> Column {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut backend = self.inner.lock();
        backend.compute_named(request)
    }

    /// Number of batched calls submitted so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> String {
        self.inner.lock().name().to_string()
    }

    pub fn into_inner(self) -> B {
        self.inner.into_inner()
    }
}

impl<B> std::fmt::Debug for ExclusiveBackend<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExclusiveBackend")
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
