//! Sub-expressions that must be computed in full before any element can be
//! read: matrix products, convolutions and pooling.
//!
//! A temporary is forced once, during the pre-assignment pass of the
//! statement that owns it, and its result lives as long as the expression.
use std::cell::OnceCell;

use log::trace;

use crate::element::Element;
use crate::expr::Expr;
use crate::gpu::{Kernel, SharedDevice};
use crate::select::DispatchContext;
use crate::shape::Shape;
use crate::tensor::{zeroed, Buffer};
use crate::traits::ExprTraits;

mod conv;
mod gemm;
mod pool;

pub use conv::*;
pub use gemm::*;
pub use pool::*;

/// Device of the first operand with a mirror, if it provides `kernel`.
pub(crate) fn device_for<T: Element>(
    operands: &[Expr<'_, T>],
    kernel: Kernel,
) -> Option<SharedDevice<T>> {
    operands
        .iter()
        .find_map(|op| op.find_device())
        .filter(|device| device.supports(kernel))
}

pub enum TemporaryKind<T> {
    Gemm(GemmSpec),
    Conv(ConvSpec),
    Pool(PoolSpec<T>),
}

pub struct Temporary<'a, T: Element> {
    kind: TemporaryKind<T>,
    operands: Vec<Expr<'a, T>>,
    shape: Shape,
    result: OnceCell<Buffer<T>>,
}

impl<'a, T: Element> Temporary<'a, T> {
    pub(crate) fn new(kind: TemporaryKind<T>, operands: Vec<Expr<'a, T>>, dims: &[usize]) -> Self {
        Temporary {
            kind,
            operands,
            shape: Shape::new(dims),
            result: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            TemporaryKind::Gemm(spec) => spec.name(),
            TemporaryKind::Conv(spec) => spec.name(),
            TemporaryKind::Pool(spec) => spec.name(),
        }
    }

    pub fn kind(&self) -> &TemporaryKind<T> {
        &self.kind
    }

    pub fn operands(&self) -> &[Expr<'a, T>] {
        &self.operands
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub(crate) fn traits(&self) -> ExprTraits {
        ExprTraits {
            shape: self.shape.clone(),
            is_fast: self.operands.iter().all(|op| op.traits().is_fast),
            is_direct: true,
            is_linear: true,
            is_generator: false,
            is_temporary: true,
            is_gpu: self.operands.iter().all(|op| op.traits().is_gpu),
            vectorizable: T::VECTORIZABLE,
        }
    }

    pub fn is_forced(&self) -> bool {
        self.result.get().is_some()
    }

    pub(crate) fn pre_assign_operands(&self, ctx: &DispatchContext) {
        for operand in &self.operands {
            operand.pre_assign(ctx);
        }
    }

    /// Computes the result once. Later calls are no-ops.
    pub fn force(&self, ctx: &DispatchContext) {
        if self.is_forced() {
            return;
        }
        let result = self.compute(ctx);
        // operands cannot reach this cell, so it is still empty
        let _ = self.result.set(result);
    }

    fn compute(&self, ctx: &DispatchContext) -> Buffer<T> {
        self.pre_assign_operands(ctx);
        let mut result = zeroed(self.shape.size());
        self.compute_into(ctx, &mut result);
        result
    }

    /// Writes the result straight into `out`, which must hold exactly
    /// `shape().size()` elements. Operands must have been pre-assigned.
    pub(crate) fn compute_into(&self, ctx: &DispatchContext, out: &mut [T]) {
        contract!(
            out.len() == self.shape.size(),
            "{} writes {} elements into a buffer of {}",
            self.name(),
            self.shape.size(),
            out.len()
        );
        match &self.kind {
            TemporaryKind::Gemm(spec) => spec.compute(&self.operands, ctx, out),
            TemporaryKind::Conv(spec) => spec.compute(&self.operands, ctx, out),
            TemporaryKind::Pool(spec) => spec.compute(&self.operands, ctx, out),
        }
    }

    /// The forced result. A read before the pre-assignment pass forces with
    /// the global dispatch context.
    pub(crate) fn result(&self) -> &[T] {
        self.result.get_or_init(|| {
            trace!("Forcing {} outside of an assignment", self.name());
            self.compute(&DispatchContext::global())
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::gpu::EmulatedDevice;
    use crate::tensor::Tensor;
    use crate::view::transpose;

    #[test]
    fn forced_once() {
        let a = Tensor::fast_matrix([[1.0_f32, 2.0], [3.0, 4.0]]);
        let b = Tensor::fast_matrix([[1.0_f32, 0.0], [0.0, 1.0]]);
        let product = mul(&a, &b);
        let temporary = match product.as_temporary() {
            Some(t) => t,
            None => panic!("mul builds a temporary"),
        };
        assert!(!temporary.is_forced());
        product.pre_assign(&DispatchContext::default());
        assert!(temporary.is_forced());
        assert_eq!(product.value_at(3), 4.0);
    }

    #[test]
    fn unforced_read_forces() {
        let a = Tensor::fast_vector([1.0_f64, 2.0, 3.0, 4.0]);
        let m = Tensor::fast_matrix([[1.0, 1.0, 1.0, 1.0]]);
        let e = mul(&m, &a);
        assert_eq!(e.dims(), &[1]);
        assert_eq!(e.value_at(0), 10.0);
    }

    #[test]
    fn traits_are_row_major_and_direct() {
        let a = Tensor::<f64>::zeros(&[3, 2]);
        let b = Tensor::<f64>::zeros(&[2, 4]);
        let e = mul(&a, &b);
        let traits = e.traits();
        assert!(traits.is_temporary && traits.is_direct && traits.is_linear);
        assert_eq!(traits.dims(), &[3, 4]);
        assert!(!traits.is_gpu);
    }

    #[test]
    fn device_residency_follows_operands() {
        let device = Arc::new(EmulatedDevice::<f64>::new());
        let a = Tensor::<f64>::zeros(&[2, 2]);
        let b = Tensor::<f64>::zeros(&[2, 2]);
        a.attach_device(device.clone());
        assert!(!mul(&a, &b).traits().is_gpu);
        b.attach_device(device);
        assert!(mul(&a, &b).traits().is_gpu);
        assert!(mul(transpose(&a), &b).traits().is_gpu);
        assert!(max_pool_2d(mul(&a, &b), 2, 2).traits().is_gpu);
    }
}
