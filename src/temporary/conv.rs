//! Convolutions.
//!
//! The plain variants compute a true convolution: the kernel is rotated by
//! 180 degrees before it slides over the input. The `_flipped` variants take
//! a kernel that is already rotated and slide it as stored.
//!
//! Layouts: 2D operands are `[h, w]`, 3D operands `[d, h, w]`. A 4D input is
//! `[batch, channels, h, w]` and a 4D kernel `[filters, channels, kh, kw]`.
//! `conv_4d_backward` takes the `[batch, filters, h, w]` gradient of a valid
//! convolution and the same kernel, and produces `[batch, channels, h, w]`.
use log::trace;

use crate::backend::{self, Conv2dGeometry, Conv4dGeometry};
use crate::element::Element;
use crate::expr::Expr;
use crate::gpu::Kernel;
use crate::select::{select_conv, ConvImpl, DispatchContext, Problem};
use crate::temporary::{device_for, Temporary, TemporaryKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConvMode {
    Valid2d,
    Full2d,
    Valid3d,
    Valid4d,
    Backward4d,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConvSpec {
    mode: ConvMode,
    flipped: bool,
    stride: [usize; 2],
    padding: [usize; 2],
    output_padding: [usize; 2],
}

fn plane(dims: &[usize]) -> [usize; 2] {
    let rank = dims.len();
    [dims[rank - 2], dims[rank - 1]]
}

impl ConvSpec {
    pub fn mode(&self) -> ConvMode {
        self.mode
    }

    pub fn is_flipped(&self) -> bool {
        self.flipped
    }

    pub fn name(&self) -> &'static str {
        match (self.mode, self.flipped) {
            (ConvMode::Valid2d, false) => "conv_2d_valid",
            (ConvMode::Valid2d, true) => "conv_2d_valid_flipped",
            (ConvMode::Full2d, false) => "conv_2d_full",
            (ConvMode::Full2d, true) => "conv_2d_full_flipped",
            (ConvMode::Valid3d, false) => "conv_3d_valid",
            (ConvMode::Valid3d, true) => "conv_3d_valid_flipped",
            (ConvMode::Valid4d, false) => "conv_4d_valid",
            (ConvMode::Valid4d, true) => "conv_4d_valid_flipped",
            (ConvMode::Backward4d, false) => "conv_4d_backward",
            (ConvMode::Backward4d, true) => "conv_4d_backward_flipped",
        }
    }

    fn plane_geometry(&self, input: &[usize], kernel: &[usize]) -> Conv2dGeometry {
        match self.mode {
            ConvMode::Full2d => Conv2dGeometry::full(plane(input), plane(kernel)),
            ConvMode::Backward4d => {
                Conv2dGeometry::backward(
                    plane(input),
                    plane(kernel),
                    self.stride,
                    self.padding,
                    self.output_padding,
                )
            }
            _ => Conv2dGeometry::valid(plane(input), plane(kernel), self.stride, self.padding),
        }
    }

    fn geometry_4d(&self, input: &[usize], kernel: &[usize]) -> Conv4dGeometry {
        let (in_channels, out_channels) = match self.mode {
            ConvMode::Backward4d => (kernel[0], kernel[1]),
            _ => (kernel[1], kernel[0]),
        };
        Conv4dGeometry {
            batch: input[0],
            in_channels,
            out_channels,
            plane: self.plane_geometry(input, kernel),
        }
    }

    fn output_dims(&self, input: &[usize], kernel: &[usize]) -> Vec<usize> {
        match self.mode {
            ConvMode::Valid2d | ConvMode::Full2d => {
                let g = self.plane_geometry(input, kernel);
                vec![g.oh, g.ow]
            }
            ConvMode::Valid3d => input
                .iter()
                .zip(kernel.iter())
                .map(|(i, k)| i - k + 1)
                .collect(),
            ConvMode::Valid4d | ConvMode::Backward4d => {
                let g = self.geometry_4d(input, kernel);
                vec![g.batch, g.out_channels, g.plane.oh, g.plane.ow]
            }
        }
    }

    fn check(&self, input: &[usize], kernel: &[usize]) {
        let rank = match self.mode {
            ConvMode::Valid2d | ConvMode::Full2d => 2,
            ConvMode::Valid3d => 3,
            ConvMode::Valid4d | ConvMode::Backward4d => 4,
        };
        contract!(
            input.len() == rank && kernel.len() == rank,
            "{} needs rank {} operands, got {:?} and {:?}",
            self.name(),
            rank,
            input,
            kernel
        );
        match self.mode {
            ConvMode::Valid3d => contract!(
                input.iter().zip(kernel.iter()).all(|(i, k)| i >= k),
                "{} kernel {:?} larger than input {:?}",
                self.name(),
                kernel,
                input
            ),
            ConvMode::Valid4d => contract!(
                input[1] == kernel[1],
                "{} input has {} channels, kernel expects {}",
                self.name(),
                input[1],
                kernel[1]
            ),
            ConvMode::Backward4d => contract!(
                input[1] == kernel[0],
                "{} gradient has {} channels, kernel has {} filters",
                self.name(),
                input[1],
                kernel[0]
            ),
            ConvMode::Valid2d | ConvMode::Full2d => {}
        }
    }

    pub(crate) fn compute<T: Element>(
        &self,
        operands: &[Expr<'_, T>],
        ctx: &DispatchContext,
        out: &mut [T],
    ) {
        let (input, kernel) = (&operands[0], &operands[1]);
        let plane = self.plane_geometry(input.dims(), kernel.dims());
        let device = match self.mode {
            ConvMode::Valid4d => device_for(operands, Kernel::Conv4dValid),
            _ => None,
        };
        let problem = Problem {
            n1: plane.oh,
            n2: plane.ow,
            vectorizable: T::VECTORIZABLE,
            complex_single: T::COMPLEX_SINGLE,
            gpu: device.is_some(),
            vec_supported: matches!(self.mode, ConvMode::Valid2d | ConvMode::Valid4d)
                && plane.unit(),
            blas_supported: matches!(self.mode, ConvMode::Valid4d | ConvMode::Backward4d),
        };
        let choice = select_conv(&problem, &ctx.features, ctx.conv);
        trace!("{} of {} on {:?}", self.name(), input.shape(), choice);

        if choice == ConvImpl::Gpu {
            let g = self.geometry_4d(input.dims(), kernel.dims());
            match &device {
                Some(device) => backend::gpu::conv_4d_valid(device, &g, self.flipped, input, kernel, out),
                None => unreachable!("GPU convolution selected without a device"),
            }
            return;
        }

        let (x, w) = (input.contiguous(), kernel.contiguous());
        match (self.mode, choice) {
            (ConvMode::Valid2d, ConvImpl::Std) => {
                backend::naive::conv_2d_valid(&plane, self.flipped, &x, &w, out)
            }
            (ConvMode::Valid2d, ConvImpl::Vec) => {
                backend::vec::conv_2d_valid(&plane, self.flipped, &x, &w, out)
            }
            (ConvMode::Full2d, ConvImpl::Std) => {
                backend::naive::conv_2d_full(&plane, self.flipped, &x, &w, out)
            }
            (ConvMode::Valid3d, ConvImpl::Std) => {
                let dims = |d: &[usize]| [d[0], d[1], d[2]];
                backend::naive::conv_3d_valid(
                    dims(input.dims()),
                    dims(kernel.dims()),
                    self.flipped,
                    &x,
                    &w,
                    out,
                )
            }
            (ConvMode::Valid4d, ConvImpl::Std) => {
                let g = self.geometry_4d(input.dims(), kernel.dims());
                backend::naive::conv_4d_valid(&g, self.flipped, &x, &w, out)
            }
            (ConvMode::Valid4d, ConvImpl::Vec) => {
                let g = self.geometry_4d(input.dims(), kernel.dims());
                backend::vec::conv_4d_valid(&g, self.flipped, &x, &w, out)
            }
            (ConvMode::Valid4d, ConvImpl::Blas) => {
                let g = self.geometry_4d(input.dims(), kernel.dims());
                backend::blas::conv_4d_valid(&g, self.flipped, &x, &w, out)
            }
            (ConvMode::Backward4d, ConvImpl::Std) => {
                let g = self.geometry_4d(input.dims(), kernel.dims());
                backend::naive::conv_4d_backward(&g, self.flipped, &x, &w, out)
            }
            (ConvMode::Backward4d, ConvImpl::Blas) => {
                let g = self.geometry_4d(input.dims(), kernel.dims());
                backend::blas::conv_4d_backward(&g, self.flipped, &x, &w, out)
            }
            (mode, choice) => unreachable!("{:?} has no {:?} kernel", mode, choice),
        }
    }
}

fn convolution<'a, T: Element>(
    spec: ConvSpec,
    input: Expr<'a, T>,
    kernel: Expr<'a, T>,
) -> Expr<'a, T> {
    spec.check(input.dims(), kernel.dims());
    let dims = spec.output_dims(input.dims(), kernel.dims());
    Expr::temporary(Temporary::new(
        TemporaryKind::Conv(spec),
        vec![input, kernel],
        &dims,
    ))
}

fn spec(mode: ConvMode, flipped: bool) -> ConvSpec {
    ConvSpec {
        mode,
        flipped,
        stride: [1, 1],
        padding: [0, 0],
        output_padding: [0, 0],
    }
}

macro_rules! convolutions {
    ($($name:ident, $flipped_name:ident => $mode:ident;)*) => {
        $(
            pub fn $name<'a, T: Element, I: Into<Expr<'a, T>>, K: Into<Expr<'a, T>>>(
                input: I,
                kernel: K,
            ) -> Expr<'a, T> {
                convolution(spec(ConvMode::$mode, false), input.into(), kernel.into())
            }

            pub fn $flipped_name<'a, T: Element, I: Into<Expr<'a, T>>, K: Into<Expr<'a, T>>>(
                input: I,
                kernel: K,
            ) -> Expr<'a, T> {
                convolution(spec(ConvMode::$mode, true), input.into(), kernel.into())
            }
        )*
    };
}

convolutions! {
    conv_2d_valid, conv_2d_valid_flipped => Valid2d;
    conv_2d_full, conv_2d_full_flipped => Full2d;
    conv_3d_valid, conv_3d_valid_flipped => Valid3d;
    conv_4d_valid, conv_4d_valid_flipped => Valid4d;
    conv_4d_backward, conv_4d_backward_flipped => Backward4d;
}

macro_rules! strided_convolutions {
    ($($name:ident => $mode:ident;)*) => {
        $(
            pub fn $name<'a, T: Element, I: Into<Expr<'a, T>>, K: Into<Expr<'a, T>>>(
                input: I,
                kernel: K,
                stride: [usize; 2],
                padding: [usize; 2],
                flipped: bool,
            ) -> Expr<'a, T> {
                let spec = ConvSpec {
                    mode: ConvMode::$mode,
                    flipped,
                    stride,
                    padding,
                    output_padding: [0, 0],
                };
                convolution(spec, input.into(), kernel.into())
            }
        )*
    };
}

strided_convolutions! {
    conv_2d_valid_strided => Valid2d;
    conv_4d_valid_strided => Valid4d;
}

/// Transposed strided convolution of `input` (`[N, K, H, W]`) with `kernel`
/// (`[K, C, kh, kw]`).
///
/// `output_padding` restores the trailing rows and columns a strided forward
/// pass skipped. Passing `(i + 2p - k) % s` per axis, where `i` is the
/// forward input extent, yields exactly that extent again.
pub fn conv_4d_backward_strided<'a, T: Element, I: Into<Expr<'a, T>>, K: Into<Expr<'a, T>>>(
    input: I,
    kernel: K,
    stride: [usize; 2],
    padding: [usize; 2],
    output_padding: [usize; 2],
    flipped: bool,
) -> Expr<'a, T> {
    let spec = ConvSpec {
        mode: ConvMode::Backward4d,
        flipped,
        stride,
        padding,
        output_padding,
    };
    convolution(spec, input.into(), kernel.into())
}
