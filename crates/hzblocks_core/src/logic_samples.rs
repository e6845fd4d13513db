use crate::{align_right, log2_exact, BoxNi, PointNi};

/// A regular sub-lattice of the logical space: the points `logic_box.p1 + k * delta` inside `logic_box`, where every `delta`
/// component is a power of 2. Query buffers and block buffers are dense arrays over one of these lattices, so a "pixel" is a
/// buffer coordinate and a "logic" point is a dataset coordinate.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LogicSamples {
    pub logic_box: BoxNi,
    pub delta: PointNi,
    pub shift: PointNi,
    pub nsamples: PointNi,
}

impl LogicSamples {
    pub fn new(logic_box: BoxNi, delta: PointNi) -> Self {
        let shift = delta.map_components(log2_exact);
        let nsamples = logic_box.shape().right_shift(&shift);

        Self {
            logic_box,
            delta,
            shift,
            nsamples,
        }
    }

    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn pdim(&self) -> usize {
        self.logic_box.pdim()
    }

    /// Valid when the box is full-dimensional and its shape is a whole number of steps.
    pub fn valid(&self) -> bool {
        self.logic_box.is_full_dim()
            && self.delta.pdim() == self.logic_box.pdim()
            && self.delta.all(&self.delta, |d, _| d > 0)
            && self
                .logic_box
                .shape()
                .all(&self.delta, |s, d| s % d == 0)
    }

    #[inline]
    pub fn pixel_to_logic(&self, pixel: &PointNi) -> PointNi {
        self.logic_box.p1 + pixel.left_shift(&self.shift)
    }

    #[inline]
    pub fn logic_to_pixel(&self, logic: &PointNi) -> PointNi {
        (*logic - self.logic_box.p1).right_shift(&self.shift)
    }

    pub fn pixel_to_logic_box(&self, pixels: &BoxNi) -> BoxNi {
        BoxNi::new(
            self.pixel_to_logic(&pixels.p1),
            self.pixel_to_logic(&pixels.p2),
        )
    }

    pub fn logic_to_pixel_box(&self, logic: &BoxNi) -> BoxNi {
        BoxNi::new(self.logic_to_pixel(&logic.p1), self.logic_to_pixel(&logic.p2))
    }

    /// Clips `value` to the lattice and moves both corners right onto it. Moving `p2` right never adds a lattice point
    /// beyond the original exclusive bound. Returns an invalid box when nothing remains.
    pub fn align_box(&self, value: &BoxNi) -> BoxNi {
        if !self.valid() {
            return BoxNi::invalid();
        }

        let mut value = value.intersection(&self.logic_box);
        if !value.is_full_dim() {
            return BoxNi::invalid();
        }

        for d in 0..self.pdim() {
            value.p1[d] = align_right(value.p1[d], self.logic_box.p1[d], self.delta[d]);
            value.p2[d] = align_right(value.p2[d], self.logic_box.p1[d], self.delta[d]);
        }

        value
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

    #[test]
    fn pixel_logic_round_trip() {
        let samples = LogicSamples::new(
            BoxNi::new(PointNi::from_slice(&[2, 0]), PointNi::from_slice(&[10, 16])),
            PointNi::from_slice(&[2, 4]),
        );

        assert!(samples.valid());
        assert_eq!(samples.nsamples, PointNi::from_slice(&[4, 4]));

        let pixel = PointNi::from_slice(&[3, 1]);
        let logic = samples.pixel_to_logic(&pixel);
        assert_eq!(logic, PointNi::from_slice(&[8, 4]));
        assert_eq!(samples.logic_to_pixel(&logic), pixel);
    }

    #[test]
    fn align_box_snaps_to_lattice() {
        let samples = LogicSamples::new(
            BoxNi::new(PointNi::zero(1), PointNi::fill(1, 16)),
            PointNi::fill(1, 4),
        );

        let aligned = samples.align_box(&BoxNi::new(PointNi::fill(1, 1), PointNi::fill(1, 9)));
        assert_eq!(aligned, BoxNi::new(PointNi::fill(1, 4), PointNi::fill(1, 12)));

        let outside = samples.align_box(&BoxNi::new(PointNi::fill(1, 20), PointNi::fill(1, 30)));
        assert!(!outside.valid());
    }
}
