//! Max and average pooling over the trailing two or three dimensions, with
//! the derivative and upsampling companions used in backpropagation.
//!
//! Leading dimensions are treated as a batch. Windows do not overlap and a
//! trailing remainder that does not fill a window is ignored: the pooled
//! extent is `floor(dim / c)`.
use log::trace;

use crate::backend::{self, Pool2dGeometry, Pool3dGeometry};
use crate::element::Element;
use crate::expr::Expr;
use crate::gpu::{Kernel, PoolKind};
use crate::select::{select_pool, DispatchContext, PoolImpl, Problem};
use crate::temporary::{device_for, Temporary, TemporaryKind};

#[derive(Clone, Copy, Debug)]
pub enum PoolMode<T> {
    Max(fn(T, T) -> T),
    Avg,
    MaxDerivative,
    AvgDerivative,
    MaxUpsample,
    AvgUpsample,
}

#[derive(Clone, Copy, Debug)]
pub struct PoolSpec<T> {
    mode: PoolMode<T>,
    window: [usize; 3],
    rank3: bool,
}

fn batch_of(dims: &[usize], pooled: usize) -> usize {
    dims[..dims.len() - pooled].iter().product()
}

impl<T: Element> PoolSpec<T> {
    fn new(mode: PoolMode<T>, window: &[usize]) -> Self {
        let rank3 = window.len() == 3;
        PoolSpec {
            mode,
            window: if rank3 {
                [window[0], window[1], window[2]]
            } else {
                [window[0], window[1], 1]
            },
            rank3,
        }
    }

    pub fn mode(&self) -> &PoolMode<T> {
        &self.mode
    }

    pub fn name(&self) -> &'static str {
        match (&self.mode, self.rank3) {
            (PoolMode::Max(_), false) => "max_pool_2d",
            (PoolMode::Max(_), true) => "max_pool_3d",
            (PoolMode::Avg, false) => "avg_pool_2d",
            (PoolMode::Avg, true) => "avg_pool_3d",
            (PoolMode::MaxDerivative, false) => "max_pool_derivative_2d",
            (PoolMode::MaxDerivative, true) => "max_pool_derivative_3d",
            (PoolMode::AvgDerivative, false) => "avg_pool_derivative_2d",
            (PoolMode::AvgDerivative, true) => "avg_pool_derivative_3d",
            (PoolMode::MaxUpsample, _) => "max_pool_upsample_2d",
            (PoolMode::AvgUpsample, _) => "avg_pool_upsample_2d",
        }
    }

    fn geometry_2d(&self, input: &[usize]) -> Pool2dGeometry {
        let rank = input.len();
        Pool2dGeometry::new(
            batch_of(input, 2),
            [input[rank - 2], input[rank - 1]],
            self.window[0],
            self.window[1],
        )
    }

    fn geometry_3d(&self, input: &[usize]) -> Pool3dGeometry {
        let rank = input.len();
        Pool3dGeometry::new(
            batch_of(input, 3),
            [input[rank - 3], input[rank - 2], input[rank - 1]],
            self.window[0],
            self.window[1],
            self.window[2],
        )
    }

    fn pool(&self, operands: &[Expr<'_, T>], ctx: &DispatchContext, out: &mut [T]) {
        let input = &operands[0];
        let (kind, kernel) = match self.mode {
            PoolMode::Max(_) => (PoolKind::Max, Kernel::MaxPool2d),
            _ => (PoolKind::Avg, Kernel::AvgPool2d),
        };
        let device = if self.rank3 {
            None
        } else {
            device_for(operands, kernel)
        };
        let dims = self.pooled_dims(input.dims());
        let rank = dims.len();
        let problem = Problem {
            n1: dims[rank - 2],
            n2: dims[rank - 1],
            vectorizable: T::VECTORIZABLE,
            complex_single: T::COMPLEX_SINGLE,
            gpu: device.is_some(),
            vec_supported: false,
            blas_supported: false,
        };
        let choice = select_pool(&problem, &ctx.features, ctx.pool);
        trace!("{} of {} on {:?}", self.name(), input.shape(), choice);

        if choice == PoolImpl::Gpu {
            match &device {
                Some(device) => {
                    backend::gpu::pool_2d(device, kind, &self.geometry_2d(input.dims()), input, out)
                }
                None => unreachable!("GPU pooling selected without a device"),
            }
            return;
        }

        let x = input.contiguous();
        match (self.mode, self.rank3) {
            (PoolMode::Max(max), false) => {
                backend::naive::max_pool_2d(&self.geometry_2d(input.dims()), max, &x, out)
            }
            (PoolMode::Max(max), true) => {
                backend::naive::max_pool_3d(&self.geometry_3d(input.dims()), max, &x, out)
            }
            (_, false) => backend::naive::avg_pool_2d(&self.geometry_2d(input.dims()), &x, out),
            (_, true) => backend::naive::avg_pool_3d(&self.geometry_3d(input.dims()), &x, out),
        }
    }

    pub(crate) fn compute(&self, operands: &[Expr<'_, T>], ctx: &DispatchContext, out: &mut [T]) {
        let input = operands[0].dims();
        match self.mode {
            PoolMode::Max(_) | PoolMode::Avg => self.pool(operands, ctx, out),
            PoolMode::MaxDerivative => {
                let (x, pooled) = (operands[0].contiguous(), operands[1].contiguous());
                trace!("{} of {}", self.name(), operands[0].shape());
                if self.rank3 {
                    backend::naive::max_pool_derivative_3d(&self.geometry_3d(input), &x, &pooled, out)
                } else {
                    backend::naive::max_pool_derivative_2d(&self.geometry_2d(input), &x, &pooled, out)
                }
            }
            PoolMode::AvgDerivative => {
                let window = self.window.iter().product();
                backend::naive::avg_pool_derivative(window, out)
            }
            PoolMode::MaxUpsample => {
                let x = operands[0].contiguous();
                let pooled = operands[1].contiguous();
                let errors = operands[2].contiguous();
                let g = self.geometry_2d(input);
                backend::naive::max_pool_upsample_2d(&g, &x, &pooled, &errors, out)
            }
            PoolMode::AvgUpsample => {
                let errors = operands[1].contiguous();
                backend::naive::avg_pool_upsample_2d(&self.geometry_2d(input), &errors, out)
            }
        }
    }

    /// Dimensions of the pooled result for an input of `dims`.
    fn pooled_dims(&self, dims: &[usize]) -> Vec<usize> {
        let pooled = if self.rank3 { 3 } else { 2 };
        let rank = dims.len();
        let mut out = dims.to_vec();
        for (d, c) in out[rank - pooled..].iter_mut().zip(self.window.iter()) {
            *d /= c;
        }
        out
    }

    /// Shape of the temporary: the pooled dims for a forward pool, the input
    /// dims for derivatives and upsampling.
    fn output_dims(&self, input: &[usize]) -> Vec<usize> {
        match self.mode {
            PoolMode::Max(_) | PoolMode::Avg => self.pooled_dims(input),
            _ => input.to_vec(),
        }
    }
}

fn check_window<T: Element>(name: &str, input: &Expr<'_, T>, window: &[usize]) {
    contract!(
        input.rank() >= window.len(),
        "{} pools the last {} dimensions, got {}",
        name,
        window.len(),
        input.shape()
    );
    contract!(
        window.iter().all(|&c| c > 0),
        "{} window {:?} must be positive",
        name,
        window
    );
}

fn pooling<'a, T: Element>(spec: PoolSpec<T>, operands: Vec<Expr<'a, T>>) -> Expr<'a, T> {
    let input = operands[0].dims().to_vec();
    let pooled = spec.pooled_dims(&input);
    // pooled outputs and their errors
    for (i, op) in operands.iter().enumerate().skip(1) {
        contract!(
            op.dims() == &pooled[..],
            "{} operand {} has shape {}, expected {:?}",
            spec.name(),
            i,
            op.shape(),
            pooled
        );
    }
    let dims = spec.output_dims(&input);
    Expr::temporary(Temporary::new(TemporaryKind::Pool(spec), operands, &dims))
}

fn forward<'a, T: Element>(mode: PoolMode<T>, input: Expr<'a, T>, window: &[usize]) -> Expr<'a, T> {
    let spec = PoolSpec::new(mode, window);
    check_window(spec.name(), &input, window);
    pooling(spec, vec![input])
}

pub fn max_pool_2d<'a, T: Element + PartialOrd, E: Into<Expr<'a, T>>>(
    input: E,
    c1: usize,
    c2: usize,
) -> Expr<'a, T> {
    forward(PoolMode::Max(backend::naive::larger), input.into(), &[c1, c2])
}

pub fn avg_pool_2d<'a, T: Element, E: Into<Expr<'a, T>>>(input: E, c1: usize, c2: usize) -> Expr<'a, T> {
    forward(PoolMode::Avg, input.into(), &[c1, c2])
}

pub fn max_pool_3d<'a, T: Element + PartialOrd, E: Into<Expr<'a, T>>>(
    input: E,
    c1: usize,
    c2: usize,
    c3: usize,
) -> Expr<'a, T> {
    forward(PoolMode::Max(backend::naive::larger), input.into(), &[c1, c2, c3])
}

pub fn avg_pool_3d<'a, T: Element, E: Into<Expr<'a, T>>>(
    input: E,
    c1: usize,
    c2: usize,
    c3: usize,
) -> Expr<'a, T> {
    forward(PoolMode::Avg, input.into(), &[c1, c2, c3])
}

/// 1 at every input position holding the max of its window, 0 elsewhere.
/// `output` is the pooled result of `input`.
pub fn max_pool_derivative_2d<'a, T: Element, I: Into<Expr<'a, T>>, O: Into<Expr<'a, T>>>(
    input: I,
    output: O,
    c1: usize,
    c2: usize,
) -> Expr<'a, T> {
    let input = input.into();
    let spec = PoolSpec::new(PoolMode::MaxDerivative, &[c1, c2]);
    check_window(spec.name(), &input, &[c1, c2]);
    pooling(spec, vec![input, output.into()])
}

pub fn max_pool_derivative_3d<'a, T: Element, I: Into<Expr<'a, T>>, O: Into<Expr<'a, T>>>(
    input: I,
    output: O,
    c1: usize,
    c2: usize,
    c3: usize,
) -> Expr<'a, T> {
    let input = input.into();
    let spec = PoolSpec::new(PoolMode::MaxDerivative, &[c1, c2, c3]);
    check_window(spec.name(), &input, &[c1, c2, c3]);
    pooling(spec, vec![input, output.into()])
}

/// `1 / (c1 * c2)` at every input position.
pub fn avg_pool_derivative_2d<'a, T: Element, I: Into<Expr<'a, T>>>(
    input: I,
    c1: usize,
    c2: usize,
) -> Expr<'a, T> {
    forward(PoolMode::AvgDerivative, input.into(), &[c1, c2])
}

pub fn avg_pool_derivative_3d<'a, T: Element, I: Into<Expr<'a, T>>>(
    input: I,
    c1: usize,
    c2: usize,
    c3: usize,
) -> Expr<'a, T> {
    forward(PoolMode::AvgDerivative, input.into(), &[c1, c2, c3])
}

/// Routes each pooled error back to the input position that held the max.
pub fn max_pool_upsample_2d<'a, T, I, O, R>(
    input: I,
    output: O,
    errors: R,
    c1: usize,
    c2: usize,
) -> Expr<'a, T>
where
    T: Element,
    I: Into<Expr<'a, T>>,
    O: Into<Expr<'a, T>>,
    R: Into<Expr<'a, T>>,
{
    let input = input.into();
    let spec = PoolSpec::new(PoolMode::MaxUpsample, &[c1, c2]);
    check_window(spec.name(), &input, &[c1, c2]);
    pooling(spec, vec![input, output.into(), errors.into()])
}

/// Spreads each pooled error evenly over its window.
pub fn avg_pool_upsample_2d<'a, T: Element, I: Into<Expr<'a, T>>, R: Into<Expr<'a, T>>>(
    input: I,
    errors: R,
    c1: usize,
    c2: usize,
) -> Expr<'a, T> {
    let input = input.into();
    let spec = PoolSpec::new(PoolMode::AvgUpsample, &[c1, c2]);
    check_window(spec.name(), &input, &[c1, c2]);
    pooling(spec, vec![input, errors.into()])
}
