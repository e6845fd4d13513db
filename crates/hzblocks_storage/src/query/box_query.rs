use super::{Aborted, Completion, IoMode, QueryStatus, StatusCell, ABORTED_MESSAGE};
use crate::{Array, Field, Filter};

use hzblocks_core::{BoxNi, LogicSamples, PointNi};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How the buffer of one resolution seeds the buffer of the next one in `Dataset::next`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Only the samples both lattices share are carried over; the rest keep the default value until read.
    Insert,
    /// Every new sample first takes its nearest coarser neighbour, then the shared samples are carried over exactly.
    Interpolate,
}

impl Default for MergeMode {
    fn default() -> Self {
        Self::Insert
    }
}

/// Filter bookkeeping of a query.
#[derive(Default)]
pub struct FilterState {
    /// Reads go level by level through the field's filter when set.
    pub enabled: bool,
    /// Only samples inside the domain take part in filtering. Defaults to the dataset box.
    pub domain: BoxNi,
    pub(crate) adjusted_logic_box: BoxNi,
    pub(crate) filter: Option<Arc<dyn Filter>>,
    /// The last level-by-level query, holding inverse-filtered samples.
    pub(crate) query: Option<Box<Query>>,
}

impl core::fmt::Debug for FilterState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilterState")
            .field("enabled", &self.enabled)
            .field("domain", &self.domain)
            .field("filter", &self.filter.as_ref().map(|f| f.name()))
            .finish()
    }
}

/// A request for the samples of `logic_box` at one or more resolutions.
///
/// Build it with `Dataset::create_query` and the builder methods, then drive it with `Dataset::begin`, `Dataset::execute` and
/// `Dataset::next`:
///
/// ```no_run
/// # use hzblocks_storage::prelude::*;
/// # use hzblocks_core::{BoxNi, PointNi};
/// # fn main() -> hzblocks_storage::Result<()> {
/// let dataset = Dataset::open("data/visus.idx")?;
/// let mut access = dataset.create_access()?;
///
/// let mut query = dataset
///     .create_query(IoMode::Read)
///     .logic_box(BoxNi::new(PointNi::zero(3), PointNi::fill(3, 16)))
///     .end_resolutions(vec![8, 12]);
///
/// dataset.begin(&mut query);
/// while dataset.execute(&mut access, &mut query) {
///     // `query.buffer` holds every sample up to `query.current_resolution()`.
///     dataset.next(&mut query);
/// }
/// assert!(query.ok());
/// # Ok(())
/// # }
/// ```
pub struct Query {
    pub mode: IoMode,
    pub field: Field,
    pub time: f64,
    /// Tolerated error of lossy reads; carried for backends that can use it.
    pub accuracy: f64,
    pub logic_box: BoxNi,
    /// Increasing progression of resolutions. Empty means the maximum resolution.
    pub end_resolutions: Vec<usize>,
    pub merge_mode: MergeMode,
    pub aborted: Aborted,
    /// Samples over `logic_samples()`, row-major. Set it before executing a write.
    pub buffer: Array,
    pub filter: FilterState,
    pub(crate) logic_samples: LogicSamples,
    pub(crate) cur_resolution: i32,
    pub(crate) end_cursor: Option<usize>,
    pub(crate) status: StatusCell,
}

impl Query {
    pub(crate) fn new(mode: IoMode, field: Field, time: f64, logic_box: BoxNi, domain: BoxNi) -> Self {
        Self {
            mode,
            field,
            time,
            accuracy: 0.0,
            logic_box,
            end_resolutions: Vec::new(),
            merge_mode: MergeMode::default(),
            aborted: Aborted::new(),
            buffer: Array::default(),
            filter: FilterState {
                domain,
                ..Default::default()
            },
            logic_samples: LogicSamples::invalid(),
            cur_resolution: -1,
            end_cursor: None,
            status: StatusCell::new(),
        }
    }

    pub fn logic_box(mut self, logic_box: BoxNi) -> Self {
        self.logic_box = logic_box;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    pub fn time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    /// Two steps: everything up to `start`, then refined up to `end`. A single step when they are equal.
    pub fn resolution_range(mut self, start: usize, end: usize) -> Self {
        self.end_resolutions = if start < end { vec![start, end] } else { vec![end] };
        self
    }

    pub fn end_resolutions(mut self, end_resolutions: Vec<usize>) -> Self {
        self.end_resolutions = end_resolutions;
        self
    }

    pub fn accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn merge_mode(mut self, merge_mode: MergeMode) -> Self {
        self.merge_mode = merge_mode;
        self
    }

    /// Shares a cancellation token with other work.
    pub fn aborted(mut self, aborted: Aborted) -> Self {
        self.aborted = aborted;
        self
    }

    pub fn enable_filters(mut self) -> Self {
        self.filter.enabled = true;
        self
    }

    pub fn disable_filters(&mut self) {
        self.filter.enabled = false;
        self.filter.filter = None;
    }

    /// Samples to write, in row-major order over `logic_samples()`.
    pub fn with_buffer(mut self, buffer: Array) -> Self {
        self.buffer = buffer;
        self
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

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status() == QueryStatus::Running
    }

    pub fn error_message(&self) -> String {
        self.status.error_message()
    }

    /// Returns `true` iff the query failed because it was cancelled.
    pub fn was_aborted(&self) -> bool {
        self.failed() && self.error_message() == ABORTED_MESSAGE
    }

    pub fn completion(&self) -> Completion {
        self.status.completion()
    }

    /// Requests cancellation. The query fails the next time the executor looks.
    pub fn abort(&self) {
        self.aborted.abort();
    }

    /// The finest resolution merged so far, or -1.
    #[inline]
    pub fn current_resolution(&self) -> i32 {
        self.cur_resolution
    }

    /// The resolution the current step is heading to, or -1 when not running.
    pub fn end_resolution(&self) -> i32 {
        match (self.is_running(), self.end_cursor) {
            (true, Some(cursor)) => self.end_resolutions[cursor] as i32,
            _ => -1,
        }
    }

    /// The lattice `buffer` is laid over. Only valid once the query runs.
    #[inline]
    pub fn logic_samples(&self) -> &LogicSamples {
        &self.logic_samples
    }

    #[inline]
    pub fn nsamples(&self) -> PointNi {
        self.logic_samples.nsamples
    }

    pub fn can_execute(&self) -> bool {
        self.is_running() && self.cur_resolution < self.end_resolution()
    }

    pub fn can_next(&self) -> bool {
        self.is_running() && self.cur_resolution == self.end_resolution()
    }

    /// Fills the buffer with the field's default value unless it already matches the current lattice.
    pub fn allocate_buffer_if_needed(&mut self) {
        let nsamples = self.nsamples();
        if !self.buffer.valid() || self.buffer.dims() != nsamples {
            self.buffer = Array::filled(nsamples, self.field.dtype, self.field.default_value);
        }
    }

    pub(crate) fn set_running(&self) -> bool {
        self.status.set_status(QueryStatus::Running)
    }

    pub(crate) fn set_ok(&self) -> bool {
        self.status.set_ok()
    }

    pub(crate) fn set_failed(&self, message: impl Into<String>) -> bool {
        self.status.set_failed(message)
    }
}

impl core::fmt::Debug for Query {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Query")
            .field("mode", &self.mode)
            .field("field", &self.field.name)
            .field("time", &self.time)
            .field("logic_box", &self.logic_box)
            .field("end_resolutions", &self.end_resolutions)
            .field("cur_resolution", &self.cur_resolution)
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::{BaseType, DType};

    fn query() -> Query {
        let bx = BoxNi::new(PointNi::zero(2), PointNi::fill(2, 8));

        Query::new(IoMode::Read, Field::new("data", DType::scalar(BaseType::F32)), 0.0, bx, bx)
    }

    #[test]
    fn resolution_range_builds_progression() {
        assert_eq!(query().resolution_range(3, 6).end_resolutions, vec![3, 6]);
        assert_eq!(query().resolution_range(6, 6).end_resolutions, vec![6]);
    }

    #[test]
    fn end_resolution_only_while_running() {
        let q = query().end_resolutions(vec![2, 4]);
        assert_eq!(q.end_resolution(), -1);
        assert!(!q.can_execute());

        let mut q = q;
        q.end_cursor = Some(1);
        q.set_running();
        assert_eq!(q.end_resolution(), 4);
        assert!(q.can_execute());
    }

    #[test]
    fn aborted_is_distinguished_from_failure() {
        let q = query();
        q.set_failed("disk on fire");
        assert!(q.failed());
        assert!(!q.was_aborted());

        let q = query();
        q.abort();
        q.set_failed(ABORTED_MESSAGE);
        assert!(q.was_aborted());
    }

    #[test]
    fn filter_state_starts_disabled() {
        let q = query();
        assert!(!q.filter.enabled);
        assert!(q.filter.query.is_none());
        assert_eq!(q.filter.domain, q.logic_box);

        let mut q2 = query().enable_filters();
        assert!(q2.filter.enabled);
        q2.disable_filters();
        assert!(!q2.filter.enabled);
        assert!(q2.filter.filter.is_none());
    }
}
