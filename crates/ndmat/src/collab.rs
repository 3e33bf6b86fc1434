//! Calling contract for array-processing algorithms.
//!
//! Algorithms (feature detectors, descriptor matchers, detector pipelines)
//! take every array through [`InputArray`] and [`OutputArray`], never through
//! a concrete array type, and shape each output with
//! [`OutputArray::ensure_shape`] before writing into it.
//!
//! Asynchronous variants also take a [`Stream`]. Work submitted to a stream
//! runs in submission order; an output written by such work is only valid
//! for the caller once the stream has been synchronized. Nothing here
//! synchronizes implicitly.
//!
//! ```text
//! caller                       algorithm                    stream
//!   │  detect_async(in, out, s)    │                           │
//!   │─────────────────────────────►│ out.ensure_shape(..)      │
//!   │                              │ enqueue(write into alias)─►│ (queued)
//!   │◄─────────────────────────────│                           │
//!   │  s.synchronize()             │                           │
//!   │─────────────────────────────────────────────────────────►│ runs work
//!   │  read out                                                 │
//! ```
//!
//! The core ships no algorithms; it only fixes the shape of the calls.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::proxy::{InputArray, OutputArray};

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct StreamQueue {
    name: String,
    pending: Mutex<VecDeque<Task>>,
    submitted: AtomicU64,
    completed: AtomicU64,
}

/// An ordering token for deferred work.
///
/// Clones refer to the same queue. The null stream has no queue and runs
/// every task as soon as it is submitted.
#[derive(Clone, Default)]
pub struct Stream {
    queue: Option<Arc<StreamQueue>>,
}

impl Stream {
    /// The null stream.
    #[must_use]
    pub const fn null() -> Self {
        Self { queue: None }
    }

    /// A new queueing stream.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            queue: Some(Arc::new(StreamQueue {
                name: name.into(),
                pending: Mutex::new(VecDeque::new()),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            })),
        }
    }

    /// Whether this is the null stream.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.queue.is_none()
    }

    /// Stream name for debugging.
    #[must_use]
    pub fn name(&self) -> &str {
        self.queue.as_ref().map_or("null", |q| q.name.as_str())
    }

    /// Submit `task`.
    ///
    /// On the null stream the task runs now and its error, if any, is
    /// returned. Otherwise it is queued and errors surface from
    /// [`Stream::synchronize`].
    pub fn enqueue<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let Some(q) = &self.queue else {
            return task();
        };
        let n = q.submitted.fetch_add(1, Ordering::SeqCst) + 1;
        q.pending.lock().push_back(Box::new(task));
        tracing::trace!(stream = %q.name, task = n, "enqueued");
        Ok(())
    }

    /// Run every queued task in submission order.
    ///
    /// All tasks run even if one fails; the first failure is returned.
    pub fn synchronize(&self) -> Result<()> {
        let Some(q) = &self.queue else {
            return Ok(());
        };
        let mut first_err = None;
        loop {
            // Tasks may enqueue more work, so the lock is not held while one runs.
            let Some(task) = q.pending.lock().pop_front() else {
                break;
            };
            let outcome = task();
            q.completed.fetch_add(1, Ordering::SeqCst);
            if let Err(e) = outcome {
                tracing::debug!(stream = %q.name, error = %e, "queued task failed");
                first_err.get_or_insert(e);
            }
        }
        tracing::trace!(
            stream = %q.name,
            completed = q.completed.load(Ordering::SeqCst),
            "synchronized"
        );
        first_err.map_or(Ok(()), Err)
    }

    /// True once every submitted task has run.
    #[must_use]
    pub fn query(&self) -> bool {
        self.queue.as_ref().map_or(true, |q| {
            q.completed.load(Ordering::SeqCst) == q.submitted.load(Ordering::SeqCst)
        })
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.pending.lock().len())
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Keypoint detection and descriptor extraction on a stream.
///
/// Keypoints and descriptors are written to output proxies; their layout is
/// chosen by the implementation and documented there.
pub trait Feature2DAsync {
    /// Find keypoints in `image`, restricted to non-zero `mask` entries when
    /// a mask is supplied.
    fn detect_async(
        &self,
        image: &InputArray<'_>,
        keypoints: &mut OutputArray<'_>,
        mask: &InputArray<'_>,
        stream: &Stream,
    ) -> Result<()>;

    /// Describe the given `keypoints` of `image`.
    fn compute_async(
        &self,
        image: &InputArray<'_>,
        keypoints: &InputArray<'_>,
        descriptors: &mut OutputArray<'_>,
        stream: &Stream,
    ) -> Result<()>;

    /// Detect and describe in one pass.
    fn detect_and_compute_async(
        &self,
        image: &InputArray<'_>,
        mask: &InputArray<'_>,
        keypoints: &mut OutputArray<'_>,
        descriptors: &mut OutputArray<'_>,
        stream: &Stream,
    ) -> Result<()> {
        self.detect_async(image, keypoints, mask, stream)?;
        // Keypoints must be complete before they are read back as input.
        stream.synchronize()?;
        let found = keypoints.as_input().resolve_dense()?;
        self.compute_async(image, &InputArray::from(&found), descriptors, stream)
    }
}

/// Matches query descriptors against train descriptors.
pub trait DescriptorMatcher {
    /// Write the best train match for each query row into `matches`.
    fn match_async(
        &self,
        query: &InputArray<'_>,
        train: &InputArray<'_>,
        matches: &mut OutputArray<'_>,
        stream: &Stream,
    ) -> Result<()>;
}

/// Finds objects in an image.
pub trait ObjectDetector {
    /// Write one entry per detected object into `objects`.
    fn detect_objects(
        &self,
        image: &InputArray<'_>,
        objects: &mut OutputArray<'_>,
        stream: &Stream,
    ) -> Result<()>;
}
