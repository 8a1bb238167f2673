//! Buffer system: device, upload queue, and worker lifetime.
//!
//! [`BufferSystem`] wires a [`GeometryDevice`] to a shared
//! [`WorkQueue`] drained by named upload worker threads, and hands out
//! [`GeometryBuffer`]s attached to both. Dropping the system closes the
//! queue and joins the workers after the remaining uploads drain.

use std::sync::Arc;

use meshstream_core::{WorkQueue, WorkerThread};

use crate::attributes::AttributeMask;
use crate::buffer::GeometryBuffer;
use crate::device::{BufferUsage, GeometryDevice};
use crate::error::GeometryError;

/// Uploads at or below this size skip the work queue by default.
pub const DEFAULT_IMMEDIATE_UPLOAD_THRESHOLD: usize = 64 * 1024;

/// Tuning knobs for a [`BufferSystem`].
#[derive(Debug, Clone)]
pub struct BufferSystemConfig {
    /// Number of upload worker threads.
    pub worker_threads: usize,
    /// Largest storage size still uploaded inline on the calling thread.
    ///
    /// Setting this to `usize::MAX` disables the background path entirely;
    /// `0` routes every upload through the queue.
    pub immediate_upload_threshold: usize,
}

impl Default for BufferSystemConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            immediate_upload_threshold: DEFAULT_IMMEDIATE_UPLOAD_THRESHOLD,
        }
    }
}

/// Owner of the upload queue and its workers; factory for geometry buffers.
pub struct BufferSystem {
    device: Arc<dyn GeometryDevice>,
    queue: Arc<WorkQueue>,
    workers: Vec<WorkerThread>,
    immediate_upload_threshold: usize,
}

impl BufferSystem {
    /// Spawn the upload workers and return the running system.
    pub fn new(
        device: Arc<dyn GeometryDevice>,
        config: BufferSystemConfig,
    ) -> Result<Self, GeometryError> {
        let queue = Arc::new(WorkQueue::new());
        let mut workers = Vec::with_capacity(config.worker_threads);
        for i in 0..config.worker_threads {
            let worker = WorkerThread::spawn(format!("geometry-upload-{i}"), Arc::clone(&queue))
                .map_err(|e| {
                    GeometryError::Internal(format!("failed to spawn upload worker: {e}"))
                })?;
            workers.push(worker);
        }
        log::info!(
            "buffer system up on device '{}' with {} upload worker(s)",
            device.name(),
            workers.len()
        );
        Ok(Self {
            device,
            queue,
            workers,
            immediate_upload_threshold: config.immediate_upload_threshold,
        })
    }

    /// Create an unallocated buffer for the given attribute set.
    ///
    /// Call [`GeometryBuffer::allocate`] before mapping or binding it.
    pub fn create_buffer(&self, mask: AttributeMask, usage: BufferUsage) -> GeometryBuffer {
        GeometryBuffer::new(
            Arc::clone(&self.device),
            Arc::clone(&self.queue),
            self.immediate_upload_threshold,
            mask,
            usage,
        )
    }

    /// The device buffers are created on.
    pub fn device(&self) -> &Arc<dyn GeometryDevice> {
        &self.device
    }

    /// The shared upload queue.
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Current inline-upload cutoff in bytes.
    pub fn immediate_upload_threshold(&self) -> usize {
        self.immediate_upload_threshold
    }

    /// Number of uploads waiting in the queue.
    pub fn pending_uploads(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for BufferSystem {
    fn drop(&mut self) {
        self.queue.close();
        for worker in self.workers.drain(..) {
            worker.join();
        }
        log::info!("buffer system shut down");
    }
}

static_assertions::assert_impl_all!(BufferSystem: Send, Sync);
