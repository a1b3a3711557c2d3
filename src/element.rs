//! Element types a tensor can hold, and the capability traits that gate
//! operations on them.
use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

use num::Complex;
use num_traits::{Float, One, Zero};

/// Width in bytes of one vector register for the lane loop.
pub const VECTOR_BYTES: usize = if cfg!(target_feature = "avx512f") {
    64
} else {
    32
};

/// Upper bound on [`Element::LANES`] over every supported element type.
pub const MAX_LANES: usize = 16;

/// Byte alignment of every tensor buffer.
pub const ALIGNMENT: usize = 64;

pub trait Element:
    Copy
    + Debug
    + PartialEq
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Elements processed per lane-loop iteration.
    const LANES: usize = VECTOR_BYTES / std::mem::size_of::<Self>();
    /// Whether the lane loop may be used for this type at all.
    const VECTORIZABLE: bool;
    /// Single precision complex, the type GPU offload is tuned for.
    const COMPLEX_SINGLE: bool = false;

    fn from_count(n: usize) -> Self;

    fn is_finite_value(self) -> bool;
}

impl Element for f32 {
    const VECTORIZABLE: bool = true;

    fn from_count(n: usize) -> Self {
        n as f32
    }

    fn is_finite_value(self) -> bool {
        self.is_finite()
    }
}

impl Element for f64 {
    const VECTORIZABLE: bool = true;

    fn from_count(n: usize) -> Self {
        n as f64
    }

    fn is_finite_value(self) -> bool {
        self.is_finite()
    }
}

impl Element for Complex<f32> {
    const VECTORIZABLE: bool = true;
    const COMPLEX_SINGLE: bool = true;

    fn from_count(n: usize) -> Self {
        Complex::new(n as f32, 0.0)
    }

    fn is_finite_value(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

impl Element for Complex<f64> {
    const VECTORIZABLE: bool = true;

    fn from_count(n: usize) -> Self {
        Complex::new(n as f64, 0.0)
    }

    fn is_finite_value(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

impl Element for i32 {
    const VECTORIZABLE: bool = false;

    fn from_count(n: usize) -> Self {
        n as i32
    }

    fn is_finite_value(self) -> bool {
        true
    }
}

impl Element for i64 {
    const VECTORIZABLE: bool = false;

    fn from_count(n: usize) -> Self {
        n as i64
    }

    fn is_finite_value(self) -> bool {
        true
    }
}

/// Real floating point elements.
pub trait Real: Element + Float {}

impl<T: Element + Float> Real for T {}

/// Integral elements, the only ones that support `%` and `%=`.
pub trait Integral: Element + Rem<Output = Self> + Ord {}

impl Integral for i32 {}
impl Integral for i64 {}

/// Elements with exp, log and sqrt, real or complex.
pub trait Transcendental: Element {
    fn exponential(self) -> Self;
    fn logarithm(self) -> Self;
    fn square_root(self) -> Self;
}

macro_rules! transcendental {
    ($($t:ty),*) => {
        $(
            impl Transcendental for $t {
                #[inline]
                fn exponential(self) -> Self {
                    self.exp()
                }

                #[inline]
                fn logarithm(self) -> Self {
                    self.ln()
                }

                #[inline]
                fn square_root(self) -> Self {
                    self.sqrt()
                }
            }
        )*
    };
}

transcendental!(f32, f64, Complex<f32>, Complex<f64>);

pub trait ComplexElement: Element {
    fn conjugate(self) -> Self;
}

impl ComplexElement for Complex<f32> {
    fn conjugate(self) -> Self {
        self.conj()
    }
}

impl ComplexElement for Complex<f64> {
    fn conjugate(self) -> Self {
        self.conj()
    }
}
