use num::Integer;

/// Rounds `v` down onto the lattice `p0 + k * step`.
#[inline]
pub fn align_left(v: i64, p0: i64, step: i64) -> i64 {
    v - (v - p0).mod_floor(&step)
}

/// Rounds `v` up onto the lattice `p0 + k * step`. Already aligned values are unchanged.
#[inline]
pub fn align_right(v: i64, p0: i64, step: i64) -> i64 {
    if is_aligned(v, p0, step) {
        v
    } else {
        align_left(v, p0, step) + step
    }
}

#[inline]
pub fn is_aligned(v: i64, p0: i64, step: i64) -> bool {
    (v - p0).mod_floor(&step) == 0
}

#[inline]
pub fn is_power_of_2(v: i64) -> bool {
    v > 0 && v & (v - 1) == 0
}

/// The least power of 2 that is `>= v` (1 for non-positive values).
#[inline]
pub fn power_of_2_ceil(v: i64) -> i64 {
    if v <= 1 {
        1
    } else {
        1 << (64 - (v - 1).leading_zeros())
    }
}

/// Log base 2 of a power of 2.
#[inline]
pub fn log2_exact(v: i64) -> i64 {
    debug_assert!(is_power_of_2(v));
    v.trailing_zeros() as i64
}

#[inline]
pub fn least_common_multiple(a: i64, b: i64) -> i64 {
    a.lcm(&b)
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
    fn align_on_offset_lattice() {
        assert_eq!(align_left(-3, 0, 4), -4);
        assert_eq!(align_left(5, 1, 4), 5);
        assert_eq!(align_left(6, 1, 4), 5);
        assert_eq!(align_right(6, 1, 4), 9);
        assert_eq!(align_right(9, 1, 4), 9);
        assert_eq!(align_right(-1, 0, 2), 0);
    }

    #[test]
    fn powers_of_2() {
        assert_eq!(power_of_2_ceil(0), 1);
        assert_eq!(power_of_2_ceil(1), 1);
        assert_eq!(power_of_2_ceil(3), 4);
        assert_eq!(power_of_2_ceil(16), 16);
        assert_eq!(power_of_2_ceil(17), 32);
        assert_eq!(log2_exact(32), 5);
        assert!(!is_power_of_2(12));
    }

    #[test]
    fn lcm_of_sample_steps() {
        assert_eq!(least_common_multiple(6, 5), 30);
        assert_eq!(least_common_multiple(4, 8), 8);
    }
}
