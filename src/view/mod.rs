//! Zero-copy reinterpretations of an expression.
//!
//! A view maps each of its indices to an index of the expression it wraps.
//! Views compose, and only `sub` and `reshape` over contiguous memory keep
//! the lane loop available.
use num_traits::Float;

use crate::element::{Element, Real};
use crate::expr::Expr;
use crate::shape::{Shape, StorageOrder, MAX_RANK};
use crate::traits::ExprTraits;

#[derive(Clone, Debug)]
pub enum ViewKind<T> {
    HFlip,
    VFlip,
    FFlip,
    Rep { dims: Vec<usize> },
    RepL { dims: Vec<usize> },
    Transpose,
    Sub { index: usize, offset: usize },
    Reshape,
    ProbPoolH { c1: usize, c2: usize, exp: fn(T) -> T },
    ProbPoolP { c1: usize, c2: usize, exp: fn(T) -> T },
}

impl<T> ViewKind<T> {
    pub fn name(&self) -> &'static str {
        match self {
            ViewKind::HFlip => "hflip",
            ViewKind::VFlip => "vflip",
            ViewKind::FFlip => "fflip",
            ViewKind::Rep { .. } => "rep",
            ViewKind::RepL { .. } => "rep_l",
            ViewKind::Transpose => "transpose",
            ViewKind::Sub { .. } => "sub",
            ViewKind::Reshape => "reshape",
            ViewKind::ProbPoolH { .. } => "p_max_pool_h",
            ViewKind::ProbPoolP { .. } => "p_max_pool_p",
        }
    }
}

pub struct View<'a, T: Element> {
    kind: ViewKind<T>,
    sub: Expr<'a, T>,
    shape: Shape,
}

impl<'a, T: Element> View<'a, T> {
    fn new(kind: ViewKind<T>, sub: Expr<'a, T>, shape: Shape) -> Self {
        View { kind, sub, shape }
    }

    pub fn kind(&self) -> &ViewKind<T> {
        &self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn sub(&self) -> &Expr<'a, T> {
        &self.sub
    }

    pub(crate) fn into_sub(self) -> Expr<'a, T> {
        self.sub
    }

    pub(crate) fn is_transpose(&self) -> bool {
        matches!(self.kind, ViewKind::Transpose)
    }

    /// True when a flat index of the view is a fixed offset into the flat
    /// order of the wrapped expression.
    fn contiguous_sub(&self) -> bool {
        self.sub.traits().storage_order() == StorageOrder::RowMajor
    }

    pub(crate) fn traits(&self) -> ExprTraits {
        let st = self.sub.traits();
        match self.kind {
            ViewKind::Sub { .. } => {
                let contiguous = self.contiguous_sub() && st.is_linear;
                ExprTraits {
                    shape: self.shape.clone(),
                    is_fast: st.is_fast,
                    is_direct: st.is_direct && contiguous,
                    is_linear: contiguous,
                    is_generator: false,
                    is_temporary: false,
                    is_gpu: st.is_gpu,
                    vectorizable: st.vectorizable && contiguous,
                }
            }
            ViewKind::Reshape => ExprTraits {
                shape: self.shape.clone(),
                is_fast: st.is_fast,
                is_direct: st.is_direct,
                is_linear: st.is_linear,
                is_generator: false,
                is_temporary: false,
                is_gpu: st.is_gpu,
                vectorizable: st.vectorizable,
            },
            _ => ExprTraits {
                shape: self.shape.clone(),
                is_fast: st.is_fast,
                is_direct: false,
                is_linear: false,
                is_generator: false,
                is_temporary: false,
                is_gpu: st.is_gpu,
                vectorizable: false,
            },
        }
    }

    /// Writes the source index for `index` into `src` and returns its rank.
    #[inline]
    fn source_index(&self, index: &[usize], src: &mut [usize; MAX_RANK]) -> usize {
        let sub_dims = self.sub.dims();
        match &self.kind {
            ViewKind::HFlip => {
                if index.len() == 1 {
                    src[0] = sub_dims[0] - 1 - index[0];
                } else {
                    src[0] = index[0];
                    src[1] = sub_dims[1] - 1 - index[1];
                }
            }
            ViewKind::VFlip => {
                if index.len() == 1 {
                    src[0] = index[0];
                } else {
                    src[0] = sub_dims[0] - 1 - index[0];
                    src[1] = index[1];
                }
            }
            ViewKind::FFlip => {
                if index.len() == 1 {
                    src[0] = sub_dims[0] - 1 - index[0];
                } else {
                    src[0] = sub_dims[0] - 1 - index[0];
                    src[1] = sub_dims[1] - 1 - index[1];
                }
            }
            ViewKind::Rep { .. } => {
                src[..sub_dims.len()].copy_from_slice(&index[..sub_dims.len()]);
            }
            ViewKind::RepL { dims } => {
                src[..sub_dims.len()].copy_from_slice(&index[dims.len()..]);
            }
            ViewKind::Transpose => {
                if index.len() == 1 {
                    src[0] = index[0];
                } else {
                    src[0] = index[1];
                    src[1] = index[0];
                }
            }
            ViewKind::Sub { index: i, .. } => {
                src[0] = *i;
                src[1..=index.len()].copy_from_slice(index);
            }
            ViewKind::Reshape | ViewKind::ProbPoolH { .. } | ViewKind::ProbPoolP { .. } => {
                unreachable!("{} does not map indices one to one", self.name())
            }
        }
        sub_dims.len()
    }

    /// `Σ exp(x)` over the `c1 x c2` block whose top-left corner is
    /// `(top, left)` in the last two dimensions of `index`.
    fn block_sum(
        &self,
        index: &[usize],
        top: usize,
        left: usize,
        c1: usize,
        c2: usize,
        exp: fn(T) -> T,
    ) -> T {
        let rank = index.len();
        let mut src = [0; MAX_RANK];
        src[..rank].copy_from_slice(index);
        let mut pool = T::zero();
        for a in 0..c1 {
            for b in 0..c2 {
                src[rank - 2] = top + a;
                src[rank - 1] = left + b;
                pool = pool + exp(self.sub.value_at_nd(&src[..rank]));
            }
        }
        pool
    }

    #[inline]
    pub fn value_at_nd(&self, index: &[usize]) -> T {
        match self.kind {
            ViewKind::Reshape => self.sub.value_at(self.shape.offset(index)),
            ViewKind::ProbPoolH { c1, c2, exp } => {
                let rank = index.len();
                let (i, j) = (index[rank - 2], index[rank - 1]);
                let pool = self.block_sum(index, i / c1 * c1, j / c2 * c2, c1, c2, exp);
                exp(self.sub.value_at_nd(index)) / (T::one() + pool)
            }
            ViewKind::ProbPoolP { c1, c2, exp } => {
                let rank = index.len();
                let (i, j) = (index[rank - 2], index[rank - 1]);
                let pool = self.block_sum(index, i * c1, j * c2, c1, c2, exp);
                T::one() / (T::one() + pool)
            }
            _ => {
                let mut src = [0; MAX_RANK];
                let rank = self.source_index(index, &mut src);
                self.sub.value_at_nd(&src[..rank])
            }
        }
    }

    #[inline]
    pub fn value_at(&self, flat: usize) -> T {
        match self.kind {
            ViewKind::Reshape => self.sub.value_at(flat),
            ViewKind::Sub { offset, .. } if self.contiguous_sub() => self.sub.value_at(offset + flat),
            _ => {
                let mut index = [0; MAX_RANK];
                let rank = self.shape.rank();
                self.shape.unravel_into(flat, &mut index);
                self.value_at_nd(&index[..rank])
            }
        }
    }

    /// Position of `flat` in the buffer of the leaf under a direct view.
    pub fn element_offset(&self, flat: usize) -> Option<usize> {
        match self.kind {
            ViewKind::Reshape => self.sub.element_offset(flat),
            ViewKind::Sub { offset, .. } if self.contiguous_sub() => {
                self.sub.element_offset(offset + flat)
            }
            _ => None,
        }
    }

    #[inline]
    pub fn load(&self, flat: usize) -> crate::op::Pack<T> {
        match self.kind {
            ViewKind::Reshape => self.sub.load(flat),
            ViewKind::Sub { offset, .. } => self.sub.load(offset + flat),
            _ => unreachable!("Lane load from a {} view", self.name()),
        }
    }
}

fn flip<'a, T: Element>(kind: ViewKind<T>, expr: Expr<'a, T>) -> Expr<'a, T> {
    contract!(
        expr.rank() == 1 || expr.rank() == 2,
        "{} needs a vector or a matrix, got {}",
        kind.name(),
        expr.shape()
    );
    let shape = Shape::new(expr.dims());
    Expr::view(View::new(kind, expr, shape))
}

/// Mirrors columns; reverses a vector.
pub fn hflip<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    flip(ViewKind::HFlip, expr.into())
}

/// Mirrors rows; a vector has no rows and is returned unchanged.
pub fn vflip<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    flip(ViewKind::VFlip, expr.into())
}

/// Mirrors both axes.
pub fn fflip<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    flip(ViewKind::FFlip, expr.into())
}

/// Repeats the expression along new trailing dimensions.
pub fn rep<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E, dims: &[usize]) -> Expr<'a, T> {
    let expr = expr.into();
    let mut all = expr.dims().to_vec();
    all.extend_from_slice(dims);
    let shape = Shape::new(&all);
    Expr::view(View::new(
        ViewKind::Rep {
            dims: dims.to_vec(),
        },
        expr,
        shape,
    ))
}

/// Repeats the expression along new leading dimensions.
pub fn rep_l<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E, dims: &[usize]) -> Expr<'a, T> {
    let expr = expr.into();
    let mut all = dims.to_vec();
    all.extend_from_slice(expr.dims());
    let shape = Shape::new(&all);
    Expr::view(View::new(
        ViewKind::RepL {
            dims: dims.to_vec(),
        },
        expr,
        shape,
    ))
}

pub fn transpose<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E) -> Expr<'a, T> {
    let expr = expr.into();
    contract!(
        expr.rank() <= 2 && expr.rank() > 0,
        "transpose is defined for vectors and matrices, got {}",
        expr.shape()
    );
    let shape = match expr.dims() {
        [r, c] => Shape::new(&[*c, *r]),
        dims => Shape::new(dims),
    };
    Expr::view(View::new(ViewKind::Transpose, expr, shape))
}

/// The `index`-th slice along the leading dimension.
pub fn sub<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E, index: usize) -> Expr<'a, T> {
    let expr = expr.into();
    contract!(
        expr.rank() > 1,
        "sub needs a parent of rank 2 or more, got {}",
        expr.shape()
    );
    contract!(
        index < expr.dims()[0],
        "sub index {} out of range for {}",
        index,
        expr.shape()
    );
    let shape = Shape::new(&expr.dims()[1..]);
    let offset = index * shape.size();
    Expr::view(View::new(ViewKind::Sub { index, offset }, expr, shape))
}

/// Same elements in the same storage order, under new dimensions.
pub fn reshape<'a, T: Element, E: Into<Expr<'a, T>>>(expr: E, dims: &[usize]) -> Expr<'a, T> {
    let expr = expr.into();
    let shape = Shape::with_order(dims, expr.traits().storage_order());
    contract!(
        shape.size() == expr.size(),
        "Cannot reshape {} into {}",
        expr.shape(),
        shape
    );
    Expr::view(View::new(ViewKind::Reshape, expr, shape))
}

fn check_pool_window<T: Element>(name: &str, expr: &Expr<'_, T>, c1: usize, c2: usize) {
    contract!(
        expr.rank() >= 2,
        "{} pools the last two dimensions, got {}",
        name,
        expr.shape()
    );
    contract!(
        c1 > 0 && c2 > 0,
        "{} window {}x{} must be positive",
        name,
        c1,
        c2
    );
    let rank = expr.rank();
    contract!(
        expr.dims()[rank - 2] % c1 == 0 && expr.dims()[rank - 1] % c2 == 0,
        "{} window {}x{} does not tile {}",
        name,
        c1,
        c2,
        expr.shape()
    );
}

/// Probabilistic max pooling, detection unit. Same shape as the input.
pub fn p_max_pool_h<'a, T: Real, E: Into<Expr<'a, T>>>(
    expr: E,
    c1: usize,
    c2: usize,
) -> Expr<'a, T> {
    let expr = expr.into();
    check_pool_window("p_max_pool_h", &expr, c1, c2);
    let shape = Shape::new(expr.dims());
    let exp: fn(T) -> T = Float::exp;
    Expr::view(View::new(ViewKind::ProbPoolH { c1, c2, exp }, expr, shape))
}

/// Probabilistic max pooling, pooling unit. The last two dimensions shrink
/// by `c1` and `c2`.
pub fn p_max_pool_p<'a, T: Real, E: Into<Expr<'a, T>>>(
    expr: E,
    c1: usize,
    c2: usize,
) -> Expr<'a, T> {
    let expr = expr.into();
    check_pool_window("p_max_pool_p", &expr, c1, c2);
    let mut dims = expr.dims().to_vec();
    let rank = dims.len();
    dims[rank - 2] /= c1;
    dims[rank - 1] /= c2;
    let shape = Shape::new(&dims);
    let exp: fn(T) -> T = Float::exp;
    Expr::view(View::new(ViewKind::ProbPoolP { c1, c2, exp }, expr, shape))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tensor::Tensor;

    fn matrix() -> Tensor<f64> {
        Tensor::fast_matrix([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]])
    }

    #[test]
    fn flips_on_matrix() {
        let m = matrix();
        assert_eq!(hflip(&m).to_vec(), vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);
        assert_eq!(vflip(&m).to_vec(), vec![4.0, 5.0, 6.0, 1.0, 2.0, 3.0]);
        assert_eq!(fflip(&m).to_vec(), vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn flips_on_vector() {
        let v = Tensor::fast_vector([1, 2, 3]);
        assert_eq!(hflip(&v).to_vec(), vec![3, 2, 1]);
        assert_eq!(vflip(&v).to_vec(), vec![1, 2, 3]);
        assert_eq!(fflip(&v).to_vec(), vec![3, 2, 1]);
    }

    #[test]
    fn transpose_swaps() {
        let m = matrix();
        let t = transpose(&m);
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let v = Tensor::fast_vector([1.0_f32, 2.0]);
        assert_eq!(transpose(&v).to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn transpose_of_column_major() {
        let m = Tensor::column_major(&[2, 2], &[1, 3, 2, 4]).unwrap();
        assert_eq!(transpose(&m).to_vec(), vec![1, 3, 2, 4]);
    }

    #[test]
    fn sub_is_direct_on_row_major() {
        let m = matrix();
        let row = sub(&m, 1);
        assert!(row.traits().is_direct);
        assert!(row.traits().vectorizable);
        assert_eq!(row.element_offset(2), Some(5));
        assert_eq!(row.to_vec(), vec![4.0, 5.0, 6.0]);

        let c = Tensor::column_major(&[2, 3], &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        let row = sub(&c, 1);
        assert!(!row.traits().is_direct);
        assert_eq!(row.element_offset(0), None);
        assert_eq!(row.to_vec(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn reshape_keeps_storage() {
        let m = matrix();
        let r = reshape(&m, &[3, 2]);
        assert_eq!(r.value_at_nd(&[2, 0]), 5.0);
        assert_eq!(r.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn rep_and_rep_l() {
        let v = Tensor::fast_vector([1, 2]);
        let r = rep(&v, &[3]);
        assert_eq!(r.dims(), &[2, 3]);
        assert!(r.traits().is_fast);
        assert_eq!(r.to_vec(), vec![1, 1, 1, 2, 2, 2]);
        let l = rep_l(&v, &[2, 2]);
        assert_eq!(l.dims(), &[2, 2, 2]);
        assert_eq!(l.to_vec(), vec![1, 2, 1, 2, 1, 2, 1, 2]);
    }

    #[test]
    fn probabilistic_pooling() {
        let zeros = Tensor::<f64>::zeros(&[2, 4]);
        // each 2x2 block of zeros sums to 4 after exp
        let h = p_max_pool_h(&zeros, 2, 2).to_vec();
        for v in h {
            assert!((v - 0.2).abs() < 1e-12);
        }
        let p = p_max_pool_p(&zeros, 2, 2);
        assert_eq!(p.dims(), &[1, 2]);
        for v in p.to_vec() {
            assert!((v - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn views_compose() {
        let m = matrix();
        let e = hflip(transpose(&m));
        assert_eq!(e.to_vec(), vec![4.0, 1.0, 5.0, 2.0, 6.0, 3.0]);
    }
}
