//! Catalog of elementwise operations.
//!
//! Every operation is a kind tag plus a plain function pointer for its scalar
//! semantic. The lane semantic applies the same function across a [`Pack`],
//! so both loops agree bit for bit.
use num_traits::Signed;
use rand::{distributions::Standard, prelude::Distribution, Rng};

use crate::element::{ComplexElement, Element, Integral, Real, Transcendental};

mod pack;

pub use pack::Pack;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryKind {
    Identity,
    Plus,
    Neg,
    Abs,
    Log,
    Sqrt,
    Exp,
    Sign,
    Sigmoid,
    Softplus,
    Bernoulli,
    ReverseBernoulli,
    Conj,
}

impl UnaryKind {
    pub fn to_string(&self) -> String {
        match self {
            UnaryKind::Identity => "identity",
            UnaryKind::Plus => "plus",
            UnaryKind::Neg => "minus",
            UnaryKind::Abs => "abs",
            UnaryKind::Log => "log",
            UnaryKind::Sqrt => "sqrt",
            UnaryKind::Exp => "exp",
            UnaryKind::Sign => "sign",
            UnaryKind::Sigmoid => "sigmoid",
            UnaryKind::Softplus => "softplus",
            UnaryKind::Bernoulli => "bernoulli",
            UnaryKind::ReverseBernoulli => "r_bernoulli",
            UnaryKind::Conj => "conj",
        }
        .to_string()
    }

    /// Sampling operations draw from a random source per element and cannot
    /// be evaluated in lanes.
    pub fn vectorizable(&self) -> bool {
        !matches!(self, UnaryKind::Bernoulli | UnaryKind::ReverseBernoulli)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Max,
    Min,
}

impl BinaryKind {
    pub fn to_string(&self) -> String {
        match self {
            BinaryKind::Add => "+",
            BinaryKind::Sub => "-",
            BinaryKind::Mul => "*",
            BinaryKind::Div => "/",
            BinaryKind::Rem => "%",
            BinaryKind::Pow => "pow",
            BinaryKind::Max => "max",
            BinaryKind::Min => "min",
        }
        .to_string()
    }

    pub fn vectorizable(&self) -> bool {
        !matches!(self, BinaryKind::Rem | BinaryKind::Pow)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct UnaryOp<T> {
    kind: UnaryKind,
    apply: fn(T) -> T,
}

impl<T: Element> UnaryOp<T> {
    pub fn new(kind: UnaryKind, apply: fn(T) -> T) -> Self {
        UnaryOp { kind, apply }
    }

    pub fn kind(&self) -> UnaryKind {
        self.kind
    }

    #[inline]
    pub fn apply(&self, x: T) -> T {
        (self.apply)(x)
    }

    #[inline]
    pub fn apply_pack(&self, x: Pack<T>) -> Pack<T> {
        x.map(self.apply)
    }

    pub fn vectorizable(&self) -> bool {
        T::VECTORIZABLE && self.kind.vectorizable()
    }

    pub fn identity() -> Self {
        UnaryOp::new(UnaryKind::Identity, |x| x)
    }

    pub fn plus() -> Self {
        UnaryOp::new(UnaryKind::Plus, |x| x)
    }

    pub fn neg() -> Self {
        UnaryOp::new(UnaryKind::Neg, |x| -x)
    }

    pub fn abs() -> Self
    where
        T: Signed,
    {
        UnaryOp::new(UnaryKind::Abs, |x: T| x.abs())
    }

    pub fn sign() -> Self
    where
        T: PartialOrd,
    {
        UnaryOp::new(UnaryKind::Sign, |x: T| {
            if x > T::zero() {
                T::one()
            } else if x < T::zero() {
                -T::one()
            } else {
                T::zero()
            }
        })
    }

    pub fn log() -> Self
    where
        T: Transcendental,
    {
        UnaryOp::new(UnaryKind::Log, |x: T| x.logarithm())
    }

    pub fn sqrt() -> Self
    where
        T: Transcendental,
    {
        UnaryOp::new(UnaryKind::Sqrt, |x: T| x.square_root())
    }

    pub fn exp() -> Self
    where
        T: Transcendental,
    {
        UnaryOp::new(UnaryKind::Exp, |x: T| x.exponential())
    }

    pub fn sigmoid() -> Self
    where
        T: Real,
    {
        UnaryOp::new(UnaryKind::Sigmoid, |x: T| T::one() / (T::one() + (-x).exp()))
    }

    pub fn softplus() -> Self
    where
        T: Real,
    {
        UnaryOp::new(UnaryKind::Softplus, |x: T| (T::one() + x.exp()).ln())
    }

    /// 1 with probability `x`, 0 otherwise.
    pub fn bernoulli() -> Self
    where
        T: Real,
        Standard: Distribution<T>,
    {
        UnaryOp::new(UnaryKind::Bernoulli, |x: T| {
            if x > rand::thread_rng().gen::<T>() {
                T::one()
            } else {
                T::zero()
            }
        })
    }

    /// 0 with probability `x`, 1 otherwise.
    pub fn r_bernoulli() -> Self
    where
        T: Real,
        Standard: Distribution<T>,
    {
        UnaryOp::new(UnaryKind::ReverseBernoulli, |x: T| {
            if x > rand::thread_rng().gen::<T>() {
                T::zero()
            } else {
                T::one()
            }
        })
    }

    pub fn conj() -> Self
    where
        T: ComplexElement,
    {
        UnaryOp::new(UnaryKind::Conj, |x: T| x.conjugate())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BinaryOp<T> {
    kind: BinaryKind,
    apply: fn(T, T) -> T,
}

impl<T: Element> BinaryOp<T> {
    pub fn new(kind: BinaryKind, apply: fn(T, T) -> T) -> Self {
        BinaryOp { kind, apply }
    }

    pub fn kind(&self) -> BinaryKind {
        self.kind
    }

    #[inline]
    pub fn apply(&self, lhs: T, rhs: T) -> T {
        (self.apply)(lhs, rhs)
    }

    #[inline]
    pub fn apply_pack(&self, lhs: Pack<T>, rhs: Pack<T>) -> Pack<T> {
        lhs.zip(rhs, self.apply)
    }

    pub fn vectorizable(&self) -> bool {
        T::VECTORIZABLE && self.kind.vectorizable()
    }

    pub fn add() -> Self {
        BinaryOp::new(BinaryKind::Add, |a, b| a + b)
    }

    pub fn sub() -> Self {
        BinaryOp::new(BinaryKind::Sub, |a, b| a - b)
    }

    pub fn mul() -> Self {
        BinaryOp::new(BinaryKind::Mul, |a, b| a * b)
    }

    pub fn div() -> Self {
        BinaryOp::new(BinaryKind::Div, |a, b| a / b)
    }

    pub fn rem() -> Self
    where
        T: Integral,
    {
        BinaryOp::new(BinaryKind::Rem, |a: T, b: T| a % b)
    }

    pub fn pow() -> Self
    where
        T: Real,
    {
        BinaryOp::new(BinaryKind::Pow, |a: T, b: T| a.powf(b))
    }

    pub fn max() -> Self
    where
        T: Real,
    {
        BinaryOp::new(BinaryKind::Max, |a: T, b: T| a.max(b))
    }

    pub fn min() -> Self
    where
        T: Real,
    {
        BinaryOp::new(BinaryKind::Min, |a: T, b: T| a.min(b))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sign_of_zero_is_zero() {
        let sign = UnaryOp::<f64>::sign();
        assert_eq!(sign.apply(-3.0), -1.0);
        assert_eq!(sign.apply(0.0), 0.0);
        assert_eq!(sign.apply(2.5), 1.0);
    }

    #[test]
    fn ieee_edge_cases_propagate() {
        assert!(BinaryOp::<f32>::div().apply(1.0, 0.0).is_infinite());
        assert!(UnaryOp::<f32>::log().apply(-1.0).is_nan());
        assert_eq!(UnaryOp::<f32>::log().apply(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn rem_only_on_integers() {
        assert_eq!(BinaryOp::<i32>::rem().apply(7, 3), 1);
        assert!(!BinaryOp::<i64>::rem().vectorizable());
    }

    #[test]
    fn sampling_is_scalar_only() {
        assert!(!UnaryOp::<f32>::bernoulli().vectorizable());
        assert!(UnaryOp::<f32>::sigmoid().vectorizable());
        let certain = UnaryOp::<f64>::bernoulli();
        assert_eq!(certain.apply(1.0), 1.0);
        assert_eq!(UnaryOp::<f64>::r_bernoulli().apply(1.0), 0.0);
    }

    #[test]
    fn lane_and_scalar_agree() {
        let op = UnaryOp::<f32>::sigmoid();
        let src: Vec<f32> = (0..<f32 as Element>::LANES).map(|x| x as f32 - 3.0).collect();
        let packed = op.apply_pack(Pack::load(&src));
        for (i, x) in src.iter().enumerate() {
            assert_eq!(packed.lane(i), op.apply(*x));
        }
    }
}
