use super::{Aborted, Completion, QueryStatus, StatusCell, ABORTED_MESSAGE};
use crate::{Array, Field};

use hzblocks_core::{BoxNi, PointNi};

/// A request for the samples at a list of points, at one or more resolutions.
///
/// Each step reads every point again, snapped down to the lattice of its end resolution, so a coarse step answers with the
/// nearest coarser sample. Points outside the dataset keep the field's default value.
pub struct PointQuery {
    pub field: Field,
    pub time: f64,
    pub points: Vec<PointNi>,
    /// Increasing progression of resolutions. Empty means the maximum resolution.
    pub end_resolutions: Vec<usize>,
    pub aborted: Aborted,
    /// One sample per point, in the order of `points`.
    pub buffer: Array,
    pub(crate) cur_resolution: i32,
    pub(crate) end_cursor: Option<usize>,
    pub(crate) status: StatusCell,
}

impl PointQuery {
    pub(crate) fn new(field: Field, time: f64, points: Vec<PointNi>) -> Self {
        Self {
            field,
            time,
            points,
            end_resolutions: Vec::new(),
            aborted: Aborted::new(),
            buffer: Array::default(),
            cur_resolution: -1,
            end_cursor: None,
            status: StatusCell::new(),
        }
    }

    /// Every `step` point of `logic_box`, axis 0 fastest.
    pub fn grid_points(logic_box: &BoxNi, step: PointNi) -> Vec<PointNi> {
        PointNi::iter_range(logic_box.p1, logic_box.p2, step).collect()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    pub fn time(mut self, time: f64) -> Self {
        self.time = time;
        self
    }

    pub fn end_resolutions(mut self, end_resolutions: Vec<usize>) -> Self {
        self.end_resolutions = end_resolutions;
        self
    }

    pub fn aborted(mut self, aborted: Aborted) -> Self {
        self.aborted = aborted;
        self
    }

    #[inline]
    pub fn npoints(&self) -> usize {
        self.points.len()
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

    pub fn was_aborted(&self) -> bool {
        self.failed() && self.error_message() == ABORTED_MESSAGE
    }

    pub fn completion(&self) -> Completion {
        self.status.completion()
    }

    pub fn abort(&self) {
        self.aborted.abort();
    }

    #[inline]
    pub fn current_resolution(&self) -> i32 {
        self.cur_resolution
    }

    pub fn end_resolution(&self) -> i32 {
        match (self.is_running(), self.end_cursor) {
            (true, Some(cursor)) => self.end_resolutions[cursor] as i32,
            _ => -1,
        }
    }

    pub fn can_execute(&self) -> bool {
        self.is_running() && self.cur_resolution < self.end_resolution()
    }

    pub fn can_next(&self) -> bool {
        self.is_running() && self.cur_resolution == self.end_resolution()
    }

    /// A one-dimensional buffer of `npoints` default values, unless the buffer already has that shape.
    pub fn allocate_buffer_if_needed(&mut self) {
        let dims = PointNi::from_slice(&[self.points.len() as i64]);
        if !self.buffer.valid() || self.buffer.dims() != dims || self.buffer.dtype() != self.field.dtype {
            self.buffer = Array::filled(dims, self.field.dtype, self.field.default_value);
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

impl core::fmt::Debug for PointQuery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PointQuery")
            .field("field", &self.field.name)
            .field("time", &self.time)
            .field("npoints", &self.points.len())
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

    #[test]
    fn grid_points_step_axis_0_first() {
        let bx = BoxNi::new(PointNi::zero(2), PointNi::fill(2, 4));
        let points = PointQuery::grid_points(&bx, PointNi::fill(2, 2));

        assert_eq!(
            points,
            vec![
                PointNi::from_slice(&[0, 0]),
                PointNi::from_slice(&[2, 0]),
                PointNi::from_slice(&[0, 2]),
                PointNi::from_slice(&[2, 2]),
            ]
        );
    }

    #[test]
    fn buffer_holds_one_default_per_point() {
        let field = Field::new("data", DType::scalar(BaseType::I16)).with_default_value(-1.0);
        let mut q = PointQuery::new(field, 0.0, vec![PointNi::zero(3); 5]);
        q.allocate_buffer_if_needed();

        assert_eq!(q.buffer.dims(), PointNi::from_slice(&[5]));
        assert!(q.buffer.as_slice::<i16>().iter().all(|v| *v == -1));
        assert_eq!(q.end_resolution(), -1);
    }
}
