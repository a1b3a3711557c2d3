//! Elementwise functions over expressions.
use num_traits::Signed;
use rand::{distributions::Standard, prelude::Distribution};

use crate::element::{ComplexElement, Element, Real, Transcendental};
use crate::expr::Expr;
use crate::op::{BinaryOp, UnaryOp};

fn unary<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E, op: UnaryOp<T>) -> Expr<'a, T> {
    Expr::unary(expr.into(), op)
}

pub fn identity<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::identity())
}

pub fn plus<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::plus())
}

pub fn abs<'a, T: Element + Signed, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::abs())
}

/// Natural logarithm.
pub fn log<'a, T: Transcendental, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::log())
}

pub fn sqrt<'a, T: Transcendental, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::sqrt())
}

pub fn exp<'a, T: Transcendental, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::exp())
}

/// -1, 0 or 1.
pub fn sign<'a, T: Element + PartialOrd, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::sign())
}

pub fn sigmoid<'a, T: Real, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::sigmoid())
}

/// `ln(1 + exp(x))`.
pub fn softplus<'a, T: Real, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::softplus())
}

/// Samples 1 with probability `x` for every element `x`.
pub fn bernoulli<'a, T, E>(expr: E) -> Expr<'a, T>
where
    T: Real,
    Standard: Distribution<T>,
    E: Into<Expr<'a, T>>,
{
    unary(expr, UnaryOp::bernoulli())
}

/// Samples 0 with probability `x` for every element `x`.
pub fn r_bernoulli<'a, T, E>(expr: E) -> Expr<'a, T>
where
    T: Real,
    Standard: Distribution<T>,
    E: Into<Expr<'a, T>>,
{
    unary(expr, UnaryOp::r_bernoulli())
}

pub fn conj<'a, T: ComplexElement, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    unary(expr, UnaryOp::conj())
}

/// Every element raised to `power`.
pub fn pow<'a, T: Real, E: Into<Expr<'a, T>>>(expr: E, power: T) -> Expr<'a, T> {
    Expr::binary(expr.into(), Expr::scalar(power), BinaryOp::pow())
}

/// Elementwise maximum. `rhs` may be a scalar.
pub fn max<'a, T: Real, L: Into<Expr<'a, T>>, R: Into<Expr<'a, T>>>(lhs: L, rhs: R) -> Expr<'a, T> {
    Expr::binary(lhs.into(), rhs.into(), BinaryOp::max())
}

pub fn min<'a, T: Real, L: Into<Expr<'a, T>>, R: Into<Expr<'a, T>>>(lhs: L, rhs: R) -> Expr<'a, T> {
    Expr::binary(lhs.into(), rhs.into(), BinaryOp::min())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor::Tensor;
    use crate::Complex;

    #[test]
    fn composed_functions() {
        let a = Tensor::fast_vector([-2.0_f64, 0.0, 3.0]);
        assert_eq!(abs(&a).to_vec(), vec![2.0, 0.0, 3.0]);
        assert_eq!(sign(&a).to_vec(), vec![-1.0, 0.0, 1.0]);
        assert_eq!(max(&a, 0.0).to_vec(), vec![0.0, 0.0, 3.0]);
        assert_eq!(min(&a, abs(&a) - 1.0).to_vec(), vec![-2.0, -1.0, 2.0]);
        assert_eq!(pow(abs(&a), 2.0).to_vec(), vec![4.0, 0.0, 9.0]);
        assert_eq!(identity(plus(&a)).to_vec(), a.to_vec());
    }

    #[test]
    fn transcendental() {
        let a = Tensor::fast_vector([1.0_f32, 4.0]);
        assert_eq!(sqrt(&a).to_vec(), vec![1.0, 2.0]);
        assert_eq!(log(exp(log(&a))).to_vec()[0], 0.0);
        let s = sigmoid(Tensor::fast_vector([0.0_f64])).to_vec();
        assert_eq!(s, vec![0.5]);
        let sp = softplus(Tensor::fast_vector([0.0_f64])).to_vec();
        assert!((sp[0] - 2.0_f64.ln()).abs() < 1e-15);
    }

    #[test]
    fn sampling_extremes() {
        let p = Tensor::fast_vector([0.0_f64, 1.0, 0.0, 1.0]);
        assert_eq!(bernoulli(&p).to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(r_bernoulli(&p).to_vec(), vec![1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn complex_conjugate() {
        let z = Tensor::fast_vector([Complex::new(1.0_f32, 2.0), Complex::new(-3.0, -4.0)]);
        assert_eq!(
            conj(&z).to_vec(),
            vec![Complex::new(1.0, -2.0), Complex::new(-3.0, 4.0)]
        );
    }
}
