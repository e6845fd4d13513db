use super::{Access, AccessInfo};
use crate::{BlockQuery, Field, IoMode, Result, SharedBlockQuery, ABORTED_MESSAGE};

/// Queues block requests and hands them to the wrapped access in bursts of `batch_size`, on `flush` and on `end_io`.
///
/// A queued block does not complete until its burst is sent, so whoever waits on it must flush first. Blocks whose query was
/// aborted while queued fail instead of being sent.
pub struct BatchingAccess {
    info: AccessInfo,
    inner: Box<dyn Access>,
    queue: Vec<(IoMode, SharedBlockQuery)>,
    batch_size: usize,
}

impl BatchingAccess {
    pub fn new(inner: Box<dyn Access>, batch_size: usize) -> Self {
        // Shares the counters of the inner access.
        let mut info = inner.info().clone();
        info.name = format!("batching({})", info.name);
        info.mode = None;

        Self {
            info,
            inner,
            queue: Vec::with_capacity(batch_size),
            batch_size: batch_size.max(1),
        }
    }

    /// Number of queued requests.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn into_inner(mut self) -> Box<dyn Access> {
        self.flush();
        let Self { inner, .. } = self;

        inner
    }

    fn push(&mut self, mode: IoMode, query: SharedBlockQuery) {
        self.queue.push((mode, query));
        if self.queue.len() >= self.batch_size {
            self.dispatch();
        }
    }

    fn dispatch(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        tracing::debug!(access = %self.info.name, n = self.queue.len(), "sending batch");
        for (mode, query) in self.queue.drain(..) {
            if query.aborted.is_aborted() {
                match mode {
                    IoMode::Read => self.info.statistics.read_failed(&query, ABORTED_MESSAGE),
                    IoMode::Write => self.info.statistics.write_failed(&query, ABORTED_MESSAGE),
                }
                continue;
            }
            match mode {
                IoMode::Read => self.inner.read_block(query),
                IoMode::Write => self.inner.write_block(query),
            }
        }
    }
}

impl Access for BatchingAccess {
    fn info(&self) -> &AccessInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut AccessInfo {
        &mut self.info
    }

    fn read_block(&mut self, query: SharedBlockQuery) {
        if self.info.check_can_read(&query) {
            self.push(IoMode::Read, query);
        }
    }

    fn write_block(&mut self, query: SharedBlockQuery) {
        if self.info.check_can_write(&query) {
            self.push(IoMode::Write, query);
        }
    }

    fn begin_io(&mut self, mode: IoMode) {
        debug_assert!(self.info.mode.is_none(), "begin_io inside an open session");
        self.info.mode = Some(mode);
        self.inner.begin_io(mode);
    }

    fn end_io(&mut self) {
        self.flush();
        self.inner.end_io();
        self.info.mode = None;
    }

    fn flush(&mut self) {
        self.dispatch();
        self.inner.flush();
    }

    fn acquire_write_lock(&mut self, query: &BlockQuery) -> Result<()> {
        self.inner.acquire_write_lock(query)
    }

    fn release_write_lock(&mut self, query: &BlockQuery) -> Result<()> {
        self.inner.release_write_lock(query)
    }

    fn filename(&self, field: &Field, time: f64, blockid: u64) -> String {
        self.inner.filename(field, time, blockid)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
