//! Assignment of an expression into a tensor or a sub tensor.
//!
//! One assignment runs in this order:
//! 1. if the expression reads the destination, it is evaluated into a
//!    scratch tensor first and released, and the scratch is assigned;
//! 2. a plain `=` of an unforced temporary is computed straight into the
//!    destination buffer;
//! 3. otherwise every temporary is forced, the destination write guard is
//!    taken and one loop walks the destination: the lane loop when layouts
//!    allow it, the scalar loop over flat indices when they agree, and the
//!    scalar loop over multi-indices when they do not.
use log::trace;

use crate::element::{Element, Integral};
use crate::error::TensorError;
use crate::expr::Expr;
use crate::op::Pack;
use crate::select::DispatchContext;
use crate::shape::{Shape, StorageOrder, MAX_RANK};
use crate::tensor::{SubTensor, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssignKind {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl AssignKind {
    pub fn to_string(&self) -> String {
        match self {
            AssignKind::Assign => "=",
            AssignKind::Add => "+=",
            AssignKind::Sub => "-=",
            AssignKind::Mul => "*=",
            AssignKind::Div => "/=",
            AssignKind::Rem => "%=",
        }
        .to_string()
    }
}

/// How a computed value is combined with the value already in the
/// destination.
#[derive(Clone, Copy, Debug)]
pub struct Assignment<T> {
    kind: AssignKind,
    combine: fn(T, T) -> T,
}

impl<T: Element> Assignment<T> {
    pub fn kind(&self) -> AssignKind {
        self.kind
    }

    #[inline]
    fn apply(&self, current: T, value: T) -> T {
        (self.combine)(current, value)
    }

    pub fn assign() -> Self {
        Assignment {
            kind: AssignKind::Assign,
            combine: |_, value| value,
        }
    }

    pub fn add() -> Self {
        Assignment {
            kind: AssignKind::Add,
            combine: |current, value| current + value,
        }
    }

    pub fn sub() -> Self {
        Assignment {
            kind: AssignKind::Sub,
            combine: |current, value| current - value,
        }
    }

    pub fn mul() -> Self {
        Assignment {
            kind: AssignKind::Mul,
            combine: |current, value| current * value,
        }
    }

    pub fn div() -> Self {
        Assignment {
            kind: AssignKind::Div,
            combine: |current, value| current / value,
        }
    }

    pub fn rem() -> Self
    where
        T: Integral,
    {
        Assignment {
            kind: AssignKind::Rem,
            combine: |current: T, value: T| current % value,
        }
    }
}

/// The destination of one assignment: `shape.size()` elements of `tensor`
/// starting at `offset`.
struct Target<'t, T: Element> {
    tensor: &'t Tensor<T>,
    offset: usize,
    shape: Shape,
}

impl<'t, T: Element> Target<'t, T> {
    fn whole(tensor: &'t Tensor<T>) -> Self {
        Target {
            tensor,
            offset: 0,
            shape: tensor.shape().clone(),
        }
    }

    fn slice(sub: &SubTensor<'t, T>) -> Self {
        Target {
            tensor: sub.parent(),
            offset: sub.offset(),
            shape: sub.shape().clone(),
        }
    }

    fn is_whole(&self) -> bool {
        self.shape.size() == self.tensor.size()
    }

    fn order(&self) -> StorageOrder {
        self.shape.order()
    }
}

fn evaluate<T: Element>(
    target: &Target<'_, T>,
    assignment: Assignment<T>,
    expr: Expr<'_, T>,
    ctx: &DispatchContext,
) {
    contract!(
        expr.traits().is_generator || expr.dims() == target.shape.dims(),
        "Cannot assign {} to a destination of shape {}",
        expr.shape(),
        target.shape
    );

    if expr.alias(target.tensor.id()) {
        trace!(
            "{} {} reads its destination {}, evaluating into scratch",
            assignment.kind().to_string(),
            expr,
            target.tensor.id()
        );
        let scratch = Tensor::from_expr_ordered(expr, target.order(), ctx);
        evaluate(target, assignment, Expr::owned(scratch), ctx);
        return;
    }

    let size = target.shape.size();
    let range = target.offset..target.offset + size;

    if assignment.kind() == AssignKind::Assign && target.order() == StorageOrder::RowMajor {
        if let Some(temporary) = expr.as_temporary().filter(|t| !t.is_forced()) {
            trace!("Computing {} straight into {}", temporary.name(), target.tensor.id());
            temporary.pre_assign_operands(ctx);
            if !target.is_whole() {
                target.tensor.ensure_host();
            }
            let mut host = target.tensor.write_host();
            temporary.compute_into(ctx, &mut host[range]);
            drop(host);
            target.tensor.invalidate_device();
            return;
        }
    }

    expr.pre_assign(ctx);
    if assignment.kind() != AssignKind::Assign || !target.is_whole() {
        target.tensor.ensure_host();
    }

    let mut host = target.tensor.write_host();
    let dst = &mut host[range];
    let traits = expr.traits();
    if ctx.features.vectorize && traits.lane_compatible(target.order()) {
        trace!("Lane loop for {} {}", assignment.kind().to_string(), expr);
        lane_loop(dst, &assignment, &expr);
    } else if traits.flat_compatible(target.order()) {
        trace!("Flat loop for {} {}", assignment.kind().to_string(), expr);
        for (i, d) in dst.iter_mut().enumerate() {
            *d = assignment.apply(*d, expr.value_at(i));
        }
    } else {
        trace!("Indexed loop for {} {}", assignment.kind().to_string(), expr);
        let rank = target.shape.rank();
        let mut index = [0; MAX_RANK];
        for (i, d) in dst.iter_mut().enumerate() {
            target.shape.unravel_into(i, &mut index);
            *d = assignment.apply(*d, expr.value_at_nd(&index[..rank]));
        }
    }
    drop(host);
    target.tensor.invalidate_device();
}

fn lane_loop<T: Element>(dst: &mut [T], assignment: &Assignment<T>, expr: &Expr<'_, T>) {
    let lanes = T::LANES;
    let body = dst.len() - dst.len() % lanes;
    let mut i = 0;
    while i < body {
        let value = expr.load(i);
        let packed = if assignment.kind() == AssignKind::Assign {
            value
        } else {
            Pack::load(&dst[i..]).zip(value, assignment.combine)
        };
        packed.store(&mut dst[i..]);
        i += lanes;
    }
    for (j, d) in dst[body..].iter_mut().enumerate() {
        *d = assignment.apply(*d, expr.value_at(body + j));
    }
}

macro_rules! assignment_methods {
    ($($bound:ident, $name:ident, $name_with:ident, $make:ident;)*) => {
        impl<T: Element> Tensor<T> {
            /// Applies `assignment` for every element of `expr`.
            pub fn update<'e, E: Into<Expr<'e, T>>>(
                &self,
                assignment: Assignment<T>,
                expr: E,
                ctx: &DispatchContext,
            ) {
                evaluate(&Target::whole(self), assignment, expr.into(), ctx);
            }

            $(
                pub fn $name<'e, E: Into<Expr<'e, T>>>(&self, expr: E)
                where
                    T: $bound,
                {
                    self.$name_with(expr, &DispatchContext::global());
                }

                pub fn $name_with<'e, E: Into<Expr<'e, T>>>(&self, expr: E, ctx: &DispatchContext)
                where
                    T: $bound,
                {
                    self.update(Assignment::$make(), expr, ctx);
                }
            )*
        }

        impl<'t, T: Element> SubTensor<'t, T> {
            pub fn update<'e, E: Into<Expr<'e, T>>>(
                &self,
                assignment: Assignment<T>,
                expr: E,
                ctx: &DispatchContext,
            ) {
                evaluate(&Target::slice(self), assignment, expr.into(), ctx);
            }

            $(
                pub fn $name<'e, E: Into<Expr<'e, T>>>(&self, expr: E)
                where
                    T: $bound,
                {
                    self.$name_with(expr, &DispatchContext::global());
                }

                pub fn $name_with<'e, E: Into<Expr<'e, T>>>(&self, expr: E, ctx: &DispatchContext)
                where
                    T: $bound,
                {
                    self.update(Assignment::$make(), expr, ctx);
                }
            )*
        }
    };
}

assignment_methods! {
    Element, assign, assign_with, assign;
    Element, assign_add, assign_add_with, add;
    Element, assign_sub, assign_sub_with, sub;
    Element, assign_mul, assign_mul_with, mul;
    Element, assign_div, assign_div_with, div;
    Integral, assign_rem, assign_rem_with, rem;
}

impl<T: Element> Tensor<T> {
    /// [`Tensor::update`] that reports a shape mismatch as an error instead
    /// of a contract violation.
    pub fn try_update<'e, E: Into<Expr<'e, T>>>(
        &self,
        assignment: Assignment<T>,
        expr: E,
        ctx: &DispatchContext,
    ) -> Result<(), TensorError> {
        let expr = expr.into();
        if !expr.traits().is_generator && expr.dims() != self.dims() {
            return Err(TensorError::ShapeMismatch {
                op: assignment.kind().to_string(),
                lhs: self.dims().to_vec(),
                rhs: expr.dims().to_vec(),
            });
        }
        self.update(assignment, expr, ctx);
        Ok(())
    }

    pub fn try_assign<'e, E: Into<Expr<'e, T>>>(&self, expr: E) -> Result<(), TensorError> {
        self.try_update(Assignment::assign(), expr, &DispatchContext::global())
    }
}
