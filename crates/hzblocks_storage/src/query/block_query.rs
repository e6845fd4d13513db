use super::{Aborted, Completion, IoMode, QueryStatus, StatusCell};
use crate::{Array, Field};

use hzblocks_core::{LogicSamples, PointNi};
use std::sync::{Arc, Mutex, MutexGuard};

/// A `BlockQuery` travels between the executor and backend worker threads.
pub type SharedBlockQuery = Arc<BlockQuery>;

/// The read or write of a single block.
///
/// The buffer always holds decoded, row-major samples over `logic_samples`. Backends decode before completing a read and encode
/// on their side of a write, so the executor never sees a stored layout.
pub struct BlockQuery {
    pub field: Field,
    pub time: f64,
    pub mode: IoMode,
    pub blockid: u64,
    pub logic_samples: LogicSamples,
    pub aborted: Aborted,
    buffer: Mutex<Array>,
    status: StatusCell,
}

impl BlockQuery {
    pub fn new(
        field: Field,
        time: f64,
        mode: IoMode,
        blockid: u64,
        logic_samples: LogicSamples,
        aborted: Aborted,
    ) -> Self {
        Self {
            field,
            time,
            mode,
            blockid,
            logic_samples,
            aborted,
            buffer: Mutex::new(Array::default()),
            status: StatusCell::new(),
        }
    }

    pub fn shared(self) -> SharedBlockQuery {
        Arc::new(self)
    }

    /// Number of samples per axis.
    #[inline]
    pub fn nsamples(&self) -> PointNi {
        self.logic_samples.nsamples
    }

    /// Number of bytes of the decoded block.
    #[inline]
    pub fn nbytes(&self) -> usize {
        self.field
            .dtype
            .byte_size(self.logic_samples.nsamples.product() as usize)
    }

    pub fn buffer(&self) -> MutexGuard<'_, Array> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_buffer(&self, buffer: Array) {
        *self.buffer() = buffer;
    }

    /// Moves the buffer out, leaving an invalid array behind.
    pub fn take_buffer(&self) -> Array {
        std::mem::take(&mut *self.buffer())
    }

    /// Fills the buffer with the field's default value unless it already holds the block.
    pub fn allocate_buffer_if_needed(&self) {
        let mut buffer = self.buffer();
        if !buffer.valid() || buffer.dims() != self.nsamples() {
            *buffer = Array::filled(self.nsamples(), self.field.dtype, self.field.default_value);
        }
    }

    #[inline]
    pub fn status(&self) -> QueryStatus {
        self.status.status()
    }

    #[inline]
    pub fn ok(&self) -> bool {
        self.status() == QueryStatus::Ok
    }

    #[inline]
    pub fn failed(&self) -> bool {
        self.status() == QueryStatus::Failed
    }

    pub fn error_message(&self) -> String {
        self.status.error_message()
    }

    pub fn set_running(&self) -> bool {
        self.status.set_status(QueryStatus::Running)
    }

    pub fn set_ok(&self) -> bool {
        self.status.set_ok()
    }

    pub fn set_failed(&self, message: impl Into<String>) -> bool {
        self.status.set_failed(message)
    }

    pub fn completion(&self) -> Completion {
        self.status.completion()
    }
}

impl core::fmt::Debug for BlockQuery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockQuery")
            .field("field", &self.field.name)
            .field("time", &self.time)
            .field("mode", &self.mode)
            .field("blockid", &self.blockid)
            .field("status", &self.status)
            .finish()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
