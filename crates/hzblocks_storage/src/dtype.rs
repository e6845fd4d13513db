use crate::{IdxError, Result};

use core::convert::TryFrom;
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// The numeric type of one sample component.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BaseType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl BaseType {
    pub const ALL: [BaseType; 10] = [
        BaseType::U8,
        BaseType::I8,
        BaseType::U16,
        BaseType::I16,
        BaseType::U32,
        BaseType::I32,
        BaseType::U64,
        BaseType::I64,
        BaseType::F32,
        BaseType::F64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I8 => "int8",
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::U64 => "uint64",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    pub fn size_in_bytes(&self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }
}

/// A Rust type that can be the component of a sample.
pub trait Sample: bytemuck::Pod + Default + PartialOrd + Send + Sync + 'static {
    const BASE: BaseType;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_sample {
    ($t:ty, $base:ident) => {
        impl Sample for $t {
            const BASE: BaseType = BaseType::$base;

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_sample!(u8, U8);
impl_sample!(i8, I8);
impl_sample!(u16, U16);
impl_sample!(i16, I16);
impl_sample!(u32, U32);
impl_sample!(i32, I32);
impl_sample!(u64, U64);
impl_sample!(i64, I64);
impl_sample!(f32, F32);
impl_sample!(f64, F64);

/// Evaluates `$body` with the type alias `$T` bound to the Rust type of a runtime `BaseType`.
///
/// ```
/// use hzblocks_storage::{with_base_type, BaseType, Sample};
///
/// let max = with_base_type!(BaseType::U16, T => T::MAX.to_f64());
/// assert_eq!(max, 65535.0);
/// ```
#[macro_export]
macro_rules! with_base_type {
    ($base:expr, $T:ident => $body:expr) => {
        match $base {
            $crate::BaseType::U8 => {
                type $T = u8;
                $body
            }
            $crate::BaseType::I8 => {
                type $T = i8;
                $body
            }
            $crate::BaseType::U16 => {
                type $T = u16;
                $body
            }
            $crate::BaseType::I16 => {
                type $T = i16;
                $body
            }
            $crate::BaseType::U32 => {
                type $T = u32;
                $body
            }
            $crate::BaseType::I32 => {
                type $T = i32;
                $body
            }
            $crate::BaseType::U64 => {
                type $T = u64;
                $body
            }
            $crate::BaseType::I64 => {
                type $T = i64;
                $body
            }
            $crate::BaseType::F32 => {
                type $T = f32;
                $body
            }
            $crate::BaseType::F64 => {
                type $T = f64;
                $body
            }
        }
    };
}

/// The type of one sample: `ncomponents` values of the same `BaseType`.
///
/// The textual form is `uint8` for one component and `uint8[3]` for three; `3*uint8` is also accepted when parsing.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(into = "String", try_from = "String")]
pub struct DType {
    base: BaseType,
    ncomponents: usize,
}

impl DType {
    pub fn new(base: BaseType, ncomponents: usize) -> Self {
        debug_assert!(ncomponents > 0);

        Self { base, ncomponents }
    }

    pub fn scalar(base: BaseType) -> Self {
        Self::new(base, 1)
    }

    #[inline]
    pub fn base(&self) -> BaseType {
        self.base
    }

    #[inline]
    pub fn ncomponents(&self) -> usize {
        self.ncomponents
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.base.size_in_bytes() * self.ncomponents
    }

    /// Bytes needed by `nsamples` samples.
    #[inline]
    pub fn byte_size(&self, nsamples: usize) -> usize {
        self.bytes_per_sample() * nsamples
    }

    pub fn with_ncomponents(&self, ncomponents: usize) -> Self {
        Self::new(self.base, ncomponents)
    }
}

impl FromStr for DType {
    type Err = IdxError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = || IdxError::parse(format!("invalid dtype {:?}", s));

        let (name, ncomponents) = if let Some(open) = s.find('[') {
            if !s.ends_with(']') {
                return Err(bad());
            }
            let n = s[open + 1..s.len() - 1].trim().parse().map_err(|_| bad())?;
            (&s[..open], n)
        } else if let Some(star) = s.find('*') {
            let n = s[..star].trim().parse().map_err(|_| bad())?;
            (&s[star + 1..], n)
        } else {
            (s, 1)
        };

        if ncomponents == 0 {
            return Err(bad());
        }
        let base = BaseType::from_name(name.trim()).ok_or_else(bad)?;

        Ok(Self::new(base, ncomponents))
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ncomponents == 1 {
            f.write_str(self.base.name())
        } else {
            write!(f, "{}[{}]", self.base.name(), self.ncomponents)
        }
    }
}

impl fmt::Debug for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DType({})", self)
    }
}

impl From<DType> for String {
    fn from(dtype: DType) -> Self {
        dtype.to_string()
    }
}

impl TryFrom<String> for DType {
    type Error = IdxError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
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
    fn parse_and_display() {
        let rgb: DType = "uint8[3]".parse().unwrap();
        assert_eq!(rgb, DType::new(BaseType::U8, 3));
        assert_eq!(rgb.to_string(), "uint8[3]");
        assert_eq!(rgb.bytes_per_sample(), 3);

        let star: DType = "3*uint8".parse().unwrap();
        assert_eq!(star, rgb);

        let scalar: DType = "float64".parse().unwrap();
        assert_eq!(scalar.to_string(), "float64");
        assert_eq!(scalar.byte_size(10), 80);
    }

    #[test]
    fn rejects_unknown_types() {
        assert!("uint7".parse::<DType>().is_err());
        assert!("uint8[0]".parse::<DType>().is_err());
        assert!("uint8[2".parse::<DType>().is_err());
    }

    #[test]
    fn dispatch_by_base_type() {
        for base in BaseType::ALL.iter() {
            let size = with_base_type!(*base, T => std::mem::size_of::<T>());
            assert_eq!(size, base.size_in_bytes());
            let same = with_base_type!(*base, T => T::BASE);
            assert_eq!(same, *base);
        }
    }
}
