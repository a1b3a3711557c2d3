//! Matrix-matrix, matrix-vector and vector-matrix products.
use log::trace;

use crate::backend::{self, GemmDims};
use crate::element::Element;
use crate::expr::Expr;
use crate::gpu::Kernel;
use crate::select::{select_gemm, DispatchContext, GemmImpl, Problem};
use crate::temporary::{device_for, Temporary, TemporaryKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GemmForm {
    Gemm,
    Gemv,
    Gevm,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GemmSpec {
    form: GemmForm,
    dims: GemmDims,
}

impl GemmSpec {
    pub fn form(&self) -> GemmForm {
        self.form
    }

    pub fn dims(&self) -> &GemmDims {
        &self.dims
    }

    pub fn name(&self) -> &'static str {
        match (self.form, self.dims.trans_a, self.dims.trans_b) {
            (GemmForm::Gemv, ..) => "gemv",
            (GemmForm::Gevm, ..) => "gevm",
            (GemmForm::Gemm, false, false) => "gemm",
            (GemmForm::Gemm, true, false) => "gemm_tn",
            (GemmForm::Gemm, false, true) => "gemm_nt",
            (GemmForm::Gemm, true, true) => "gemm_tt",
        }
    }

    /// Selection size: the output for a matrix product, the matrix operand
    /// for the vector forms.
    pub(crate) fn problem<T: Element>(&self, gpu: bool) -> Problem {
        let GemmDims { m, n, k, .. } = self.dims;
        let (n1, n2) = match self.form {
            GemmForm::Gemm => (m, n),
            GemmForm::Gemv => (m, k),
            GemmForm::Gevm => (k, n),
        };
        Problem {
            n1,
            n2,
            vectorizable: T::VECTORIZABLE,
            complex_single: T::COMPLEX_SINGLE,
            gpu,
            vec_supported: true,
            blas_supported: true,
        }
    }

    pub(crate) fn compute<T: Element>(
        &self,
        operands: &[Expr<'_, T>],
        ctx: &DispatchContext,
        out: &mut [T],
    ) {
        let (a, b) = (&operands[0], &operands[1]);
        let device = device_for(operands, Kernel::Gemm);
        let problem = self.problem::<T>(device.is_some());
        let choice = select_gemm(&problem, &ctx.features, ctx.gemm);
        trace!(
            "{} with m={} n={} k={} on {:?}",
            self.name(),
            self.dims.m,
            self.dims.n,
            self.dims.k,
            choice
        );
        match choice {
            GemmImpl::Std => backend::naive::gemm(&self.dims, &a.contiguous(), &b.contiguous(), out),
            GemmImpl::Vec => backend::vec::gemm(&self.dims, &a.contiguous(), &b.contiguous(), out),
            GemmImpl::Blas => backend::blas::gemm(&self.dims, &a.contiguous(), &b.contiguous(), out),
            GemmImpl::Gpu => match &device {
                Some(device) => backend::gpu::gemm(device, &self.dims, a, b, out),
                None => unreachable!("GPU gemm selected without a device"),
            },
        }
    }
}

fn product<'a, T: Element>(
    form: GemmForm,
    dims: GemmDims,
    a: Expr<'a, T>,
    b: Expr<'a, T>,
    out: &[usize],
) -> Expr<'a, T> {
    Expr::temporary(Temporary::new(
        TemporaryKind::Gemm(GemmSpec { form, dims }),
        vec![a, b],
        out,
    ))
}

/// Logical rows and columns of a matrix operand after an optional transpose.
fn logical(m: &Expr<'_, impl Element>, transposed: bool) -> (usize, usize) {
    let dims = m.dims();
    if transposed {
        (dims[1], dims[0])
    } else {
        (dims[0], dims[1])
    }
}

/// `a * b` for two matrices. A `transpose` view on either side becomes a
/// transposition flag of the kernel call.
pub fn gemm<'a, T: Element, A: Into<Expr<'a, T>>, B: Into<Expr<'a, T>>>(a: A, b: B) -> Expr<'a, T> {
    let (a, ta) = a.into().into_transposed_operand();
    let (b, tb) = b.into().into_transposed_operand();
    contract!(
        a.rank() == 2 && b.rank() == 2,
        "gemm needs two matrices, got {} and {}",
        a.shape(),
        b.shape()
    );
    let (m, k) = logical(&a, ta);
    let (kb, n) = logical(&b, tb);
    contract!(
        k == kb,
        "gemm inner dimensions differ: {}x{} times {}x{}",
        m,
        k,
        kb,
        n
    );
    product(
        GemmForm::Gemm,
        GemmDims::new(m, n, k).transposed(ta, tb),
        a,
        b,
        &[m, n],
    )
}

/// Matrix times column vector.
pub fn gemv<'a, T: Element, A: Into<Expr<'a, T>>, X: Into<Expr<'a, T>>>(a: A, x: X) -> Expr<'a, T> {
    let (a, ta) = a.into().into_transposed_operand();
    let x = x.into();
    contract!(
        a.rank() == 2 && x.rank() == 1,
        "gemv needs a matrix and a vector, got {} and {}",
        a.shape(),
        x.shape()
    );
    let (m, k) = logical(&a, ta);
    contract!(
        x.dims()[0] == k,
        "gemv of a {}x{} matrix with a vector of {}",
        m,
        k,
        x.dims()[0]
    );
    product(
        GemmForm::Gemv,
        GemmDims::new(m, 1, k).transposed(ta, false),
        a,
        x,
        &[m],
    )
}

/// Row vector times matrix.
pub fn gevm<'a, T: Element, X: Into<Expr<'a, T>>, B: Into<Expr<'a, T>>>(x: X, b: B) -> Expr<'a, T> {
    let x = x.into();
    let (b, tb) = b.into().into_transposed_operand();
    contract!(
        x.rank() == 1 && b.rank() == 2,
        "gevm needs a vector and a matrix, got {} and {}",
        x.shape(),
        b.shape()
    );
    let (k, n) = logical(&b, tb);
    contract!(
        x.dims()[0] == k,
        "gevm of a vector of {} with a {}x{} matrix",
        x.dims()[0],
        k,
        n
    );
    product(
        GemmForm::Gevm,
        GemmDims::new(1, n, k).transposed(false, tb),
        x,
        b,
        &[n],
    )
}

/// Picks [`gemm`], [`gemv`] or [`gevm`] from the operand ranks.
pub fn mul<'a, T: Element, A: Into<Expr<'a, T>>, B: Into<Expr<'a, T>>>(a: A, b: B) -> Expr<'a, T> {
    let (a, b) = (a.into(), b.into());
    match (a.rank(), b.rank()) {
        (2, 1) => gemv(a, b),
        (1, 2) => gevm(a, b),
        (ra, rb) => {
            contract!(
                ra == 2 && rb == 2,
                "mul needs at least one matrix and no more than rank 2, got {} and {}",
                a.shape(),
                b.shape()
            );
            gemm(a, b)
        }
    }
}
