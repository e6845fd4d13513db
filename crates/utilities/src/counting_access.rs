use hzblocks_storage::{
    Aborted, Access, AccessInfo, BlockQuery, Field, IoMode, Result, SharedBlockQuery,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Forwards to another access while counting dispatched block reads, and optionally aborts a token once a number of reads
/// went out.
pub struct CountingAccess {
    inner: Box<dyn Access>,
    reads: Arc<AtomicUsize>,
    abort_after: Option<(usize, Aborted)>,
}

impl CountingAccess {
    pub fn new(inner: Box<dyn Access>) -> Self {
        Self {
            inner,
            reads: Default::default(),
            abort_after: None,
        }
    }

    /// Aborts `aborted` right after the `n`-th read is dispatched.
    pub fn abort_after(mut self, n: usize, aborted: Aborted) -> Self {
        self.abort_after = Some((n, aborted));
        self
    }

    /// A handle on the read counter that outlives the access.
    pub fn reads(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

impl Access for CountingAccess {
    fn info(&self) -> &AccessInfo {
        self.inner.info()
    }

    fn info_mut(&mut self) -> &mut AccessInfo {
        self.inner.info_mut()
    }

    fn read_block(&mut self, query: SharedBlockQuery) {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.read_block(query);
        if let Some((limit, aborted)) = &self.abort_after {
            if n >= *limit {
                aborted.abort();
            }
        }
    }

    fn write_block(&mut self, query: SharedBlockQuery) {
        self.inner.write_block(query);
    }

    fn begin_io(&mut self, mode: IoMode) {
        self.inner.begin_io(mode);
    }

    fn end_io(&mut self) {
        self.inner.end_io();
    }

    fn flush(&mut self) {
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
