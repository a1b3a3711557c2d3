//! Reductions to a single value. Each one forces the temporaries of the
//! expression, with the process-wide dispatch context unless a `_with` form
//! names another.
use num_traits::Signed;

use crate::element::{Element, Real};
use crate::expr::Expr;
use crate::select::DispatchContext;

impl<'a, T: Element> Expr<'a, T> {
    fn fold<F: FnMut(T, T) -> T>(&self, ctx: &DispatchContext, init: T, f: F) -> T {
        self.pre_assign(ctx);
        (0..self.size()).map(|flat| self.value_at(flat)).fold(init, f)
    }

    pub fn sum(&self) -> T {
        self.sum_with(&DispatchContext::global())
    }

    pub fn sum_with(&self, ctx: &DispatchContext) -> T {
        self.fold(ctx, T::zero(), |acc, x| acc + x)
    }

    pub fn mean(&self) -> T {
        self.mean_with(&DispatchContext::global())
    }

    pub fn mean_with(&self, ctx: &DispatchContext) -> T {
        self.sum_with(ctx) / T::from_count(self.size())
    }

    /// Sum of absolute values.
    pub fn asum(&self) -> T
    where
        T: Signed,
    {
        self.asum_with(&DispatchContext::global())
    }

    pub fn asum_with(&self, ctx: &DispatchContext) -> T
    where
        T: Signed,
    {
        self.fold(ctx, T::zero(), |acc, x| acc + x.abs())
    }

    /// Largest element. NaN elements are skipped.
    pub fn max(&self) -> T
    where
        T: Real,
    {
        self.max_with(&DispatchContext::global())
    }

    pub fn max_with(&self, ctx: &DispatchContext) -> T
    where
        T: Real,
    {
        self.fold(ctx, T::neg_infinity(), |acc, x| acc.max(x))
    }

    pub fn min(&self) -> T
    where
        T: Real,
    {
        self.min_with(&DispatchContext::global())
    }

    pub fn min_with(&self, ctx: &DispatchContext) -> T
    where
        T: Real,
    {
        self.fold(ctx, T::infinity(), |acc, x| acc.min(x))
    }

    /// Euclidean norm.
    pub fn norm(&self) -> T
    where
        T: Real,
    {
        self.norm_with(&DispatchContext::global())
    }

    pub fn norm_with(&self, ctx: &DispatchContext) -> T
    where
        T: Real,
    {
        self.fold(ctx, T::zero(), |acc, x| acc + x * x).sqrt()
    }
}

/// Inner product of two expressions of the same shape.
pub fn dot<'a, T: Element, A: Into<Expr<'a, T>>, B: Into<Expr<'a, T>>>(a: A, b: B) -> T {
    dot_with(a, b, &DispatchContext::global())
}

pub fn dot_with<'a, T: Element, A: Into<Expr<'a, T>>, B: Into<Expr<'a, T>>>(
    a: A,
    b: B,
    ctx: &DispatchContext,
) -> T {
    (a.into() * b).sum_with(ctx)
}
