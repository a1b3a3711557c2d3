//! Kernel sets behind the implementation selector.
//!
//! Every kernel works on row-major slices. Temporaries normalise their
//! operands to row-major before calling in, so the kernels never see a
//! column-major buffer.
pub mod blas;
pub mod gpu;
pub mod naive;
pub mod vec;

/// Row-major `c[m x n] = op(a) * op(b)` where `op` optionally transposes.
///
/// `a` is stored `m x k` (or `k x m` when `trans_a`), `b` is stored `k x n`
/// (or `n x k` when `trans_b`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GemmDims {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub trans_a: bool,
    pub trans_b: bool,
}

impl GemmDims {
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        GemmDims {
            m,
            n,
            k,
            trans_a: false,
            trans_b: false,
        }
    }

    pub fn transposed(self, trans_a: bool, trans_b: bool) -> Self {
        GemmDims {
            trans_a,
            trans_b,
            ..self
        }
    }

    /// Stored rows and columns of `a`.
    pub fn a_shape(&self) -> (usize, usize) {
        if self.trans_a {
            (self.k, self.m)
        } else {
            (self.m, self.k)
        }
    }

    /// Stored rows and columns of `b`.
    pub fn b_shape(&self) -> (usize, usize) {
        if self.trans_b {
            (self.n, self.k)
        } else {
            (self.k, self.n)
        }
    }

    #[inline]
    pub fn a_at<T: Copy>(&self, a: &[T], i: usize, p: usize) -> T {
        if self.trans_a {
            a[p * self.m + i]
        } else {
            a[i * self.k + p]
        }
    }

    #[inline]
    pub fn b_at<T: Copy>(&self, b: &[T], p: usize, j: usize) -> T {
        if self.trans_b {
            b[j * self.k + p]
        } else {
            b[p * self.n + j]
        }
    }
}

/// One input plane against one kernel plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub ih: usize,
    pub iw: usize,
    pub kh: usize,
    pub kw: usize,
    pub oh: usize,
    pub ow: usize,
    pub stride: [usize; 2],
    pub padding: [usize; 2],
}

impl Conv2dGeometry {
    /// Output of `(i + 2p - k) / s + 1` per axis.
    pub fn valid(
        input: [usize; 2],
        kernel: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
    ) -> Self {
        contract!(
            stride[0] > 0 && stride[1] > 0,
            "Convolution stride must be positive, got {:?}",
            stride
        );
        contract!(
            input[0] + 2 * padding[0] >= kernel[0] && input[1] + 2 * padding[1] >= kernel[1],
            "Kernel {:?} larger than padded input {:?} (padding {:?})",
            kernel,
            input,
            padding
        );
        Conv2dGeometry {
            ih: input[0],
            iw: input[1],
            kh: kernel[0],
            kw: kernel[1],
            oh: (input[0] + 2 * padding[0] - kernel[0]) / stride[0] + 1,
            ow: (input[1] + 2 * padding[1] - kernel[1]) / stride[1] + 1,
            stride,
            padding,
        }
    }

    /// Full convolution, output of `i + k - 1` per axis.
    pub fn full(input: [usize; 2], kernel: [usize; 2]) -> Self {
        Conv2dGeometry {
            ih: input[0],
            iw: input[1],
            kh: kernel[0],
            kw: kernel[1],
            oh: input[0] + kernel[0] - 1,
            ow: input[1] + kernel[1] - 1,
            stride: [1, 1],
            padding: [0, 0],
        }
    }

    /// Transposed valid convolution: the geometry whose valid convolution
    /// maps an `oh x ow` plane back onto `ih x iw`.
    ///
    /// A strided valid convolution drops `(i + 2p - k) % s` trailing rows
    /// and columns. `output_padding` adds them back, so passing that
    /// remainder recovers the exact input extent of the forward pass.
    pub fn backward(
        input: [usize; 2],
        kernel: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
        output_padding: [usize; 2],
    ) -> Self {
        let span = |i: usize, k: usize, s: usize, p: usize, extra: usize| {
            let full = s * (i - 1) + k + extra;
            contract!(
                full > 2 * p,
                "Padding {} leaves no output for input {} and kernel {}",
                p,
                i,
                k
            );
            full - 2 * p
        };
        contract!(
            input[0] > 0 && input[1] > 0,
            "Backward convolution of an empty plane {:?}",
            input
        );
        contract!(
            output_padding[0] < stride[0] && output_padding[1] < stride[1],
            "Output padding {:?} must be smaller than the stride {:?}",
            output_padding,
            stride
        );
        Conv2dGeometry {
            ih: input[0],
            iw: input[1],
            kh: kernel[0],
            kw: kernel[1],
            oh: span(input[0], kernel[0], stride[0], padding[0], output_padding[0]),
            ow: span(input[1], kernel[1], stride[1], padding[1], output_padding[1]),
            stride,
            padding,
        }
    }

    pub fn input_len(&self) -> usize {
        self.ih * self.iw
    }

    pub fn kernel_len(&self) -> usize {
        self.kh * self.kw
    }

    pub fn output_len(&self) -> usize {
        self.oh * self.ow
    }

    pub fn unit(&self) -> bool {
        self.stride == [1, 1] && self.padding == [0, 0]
    }

    /// Kernel coefficient paired with offset `(a, b)`. A true convolution
    /// reads the kernel rotated by 180 degrees; a flipped kernel is already
    /// rotated.
    #[inline]
    pub fn weight<T: Copy>(&self, kernel: &[T], flipped: bool, a: usize, b: usize) -> T {
        if flipped {
            kernel[a * self.kw + b]
        } else {
            kernel[(self.kh - 1 - a) * self.kw + (self.kw - 1 - b)]
        }
    }
}

/// Batched multi-channel convolution.
///
/// Valid: input `[batch, in_channels, ih, iw]`, kernel
/// `[out_channels, in_channels, kh, kw]`, output
/// `[batch, out_channels, oh, ow]`.
///
/// Backward: input `[batch, in_channels, ih, iw]`, kernel
/// `[in_channels, out_channels, kh, kw]`, output
/// `[batch, out_channels, oh, ow]` with `plane` built by
/// [`Conv2dGeometry::backward`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conv4dGeometry {
    pub batch: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    pub plane: Conv2dGeometry,
}

impl Conv4dGeometry {
    pub fn input_len(&self) -> usize {
        self.batch * self.in_channels * self.plane.input_len()
    }

    pub fn kernel_len(&self) -> usize {
        self.in_channels * self.out_channels * self.plane.kernel_len()
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.out_channels * self.plane.output_len()
    }
}

/// Non-overlapping `c1 x c2` windows over the trailing two dimensions.
/// Leading dimensions are folded into `batch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pool2dGeometry {
    pub batch: usize,
    pub ih: usize,
    pub iw: usize,
    pub c1: usize,
    pub c2: usize,
    pub oh: usize,
    pub ow: usize,
}

impl Pool2dGeometry {
    pub fn new(batch: usize, input: [usize; 2], c1: usize, c2: usize) -> Self {
        contract!(
            c1 > 0 && c2 > 0,
            "Pooling window {}x{} must be positive",
            c1,
            c2
        );
        Pool2dGeometry {
            batch,
            ih: input[0],
            iw: input[1],
            c1,
            c2,
            oh: input[0] / c1,
            ow: input[1] / c2,
        }
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.ih * self.iw
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.oh * self.ow
    }

    pub fn window(&self) -> usize {
        self.c1 * self.c2
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pool3dGeometry {
    pub batch: usize,
    pub id: usize,
    pub ih: usize,
    pub iw: usize,
    pub c1: usize,
    pub c2: usize,
    pub c3: usize,
    pub od: usize,
    pub oh: usize,
    pub ow: usize,
}

impl Pool3dGeometry {
    pub fn new(batch: usize, input: [usize; 3], c1: usize, c2: usize, c3: usize) -> Self {
        contract!(
            c1 > 0 && c2 > 0 && c3 > 0,
            "Pooling window {}x{}x{} must be positive",
            c1,
            c2,
            c3
        );
        Pool3dGeometry {
            batch,
            id: input[0],
            ih: input[1],
            iw: input[2],
            c1,
            c2,
            c3,
            od: input[0] / c1,
            oh: input[1] / c2,
            ow: input[2] / c3,
        }
    }

    pub fn input_len(&self) -> usize {
        self.batch * self.id * self.ih * self.iw
    }

    pub fn output_len(&self) -> usize {
        self.batch * self.od * self.oh * self.ow
    }

    pub fn window(&self) -> usize {
        self.c1 * self.c2 * self.c3
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn valid_geometry_with_stride_and_padding() {
        let g = Conv2dGeometry::valid([5, 5], [3, 3], [2, 2], [1, 1]);
        assert_eq!((g.oh, g.ow), (3, 3));
        let g = Conv2dGeometry::valid([4, 6], [2, 3], [1, 1], [0, 0]);
        assert_eq!((g.oh, g.ow), (3, 4));
        assert!(g.unit());
    }

    #[test]
    fn backward_inverts_valid_extent() {
        let fwd = Conv2dGeometry::valid([7, 7], [3, 3], [2, 2], [1, 1]);
        let bwd = Conv2dGeometry::backward([fwd.oh, fwd.ow], [3, 3], [2, 2], [1, 1], [0, 0]);
        assert_eq!((bwd.oh, bwd.ow), (7, 7));
    }

    #[test]
    fn backward_output_padding_restores_remainder() {
        let fwd = Conv2dGeometry::valid([8, 9], [3, 3], [2, 2], [1, 1]);
        assert_eq!((fwd.oh, fwd.ow), (4, 5));
        let bwd = Conv2dGeometry::backward([fwd.oh, fwd.ow], [3, 3], [2, 2], [1, 1], [0, 0]);
        assert_eq!((bwd.oh, bwd.ow), (7, 9));
        let bwd = Conv2dGeometry::backward([fwd.oh, fwd.ow], [3, 3], [2, 2], [1, 1], [1, 0]);
        assert_eq!((bwd.oh, bwd.ow), (8, 9));
    }

    #[test]
    fn transposed_gemm_reads() {
        // a = [[1, 2, 3], [4, 5, 6]] stored transposed as 3x2
        let a_t = [1, 4, 2, 5, 3, 6];
        let dims = GemmDims::new(2, 1, 3).transposed(true, false);
        assert_eq!(dims.a_shape(), (3, 2));
        assert_eq!(dims.a_at(&a_t, 1, 2), 6);
        assert_eq!(dims.a_at(&a_t, 0, 1), 2);
    }

    #[test]
    fn pool_output_floors() {
        let g = Pool2dGeometry::new(1, [5, 4], 2, 2);
        assert_eq!((g.oh, g.ow), (2, 2));
        let g = Pool3dGeometry::new(2, [3, 4, 4], 2, 2, 2);
        assert_eq!((g.od, g.oh, g.ow), (1, 2, 2));
        assert_eq!(g.output_len(), 8);
    }
}
