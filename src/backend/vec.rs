//! Lane-vectorized kernels.
//!
//! Each kernel adds its products in the same order as the matching kernel in
//! [`naive`](super::naive), so both produce identical results.
use std::borrow::Cow;

use crate::backend::{naive, Conv2dGeometry, Conv4dGeometry, GemmDims};
use crate::element::Element;
use crate::op::Pack;

/// `dst[j] += scale * src[j]` in lanes, with a scalar tail.
#[inline]
fn axpy<T: Element>(scale: T, src: &[T], dst: &mut [T]) {
    let n = dst.len().min(src.len());
    let mut j = 0;
    while j + T::LANES <= n {
        Pack::load(&dst[j..])
            .mul_add(scale, Pack::load(&src[j..]))
            .store(&mut dst[j..]);
        j += T::LANES;
    }
    while j < n {
        dst[j] = dst[j] + scale * src[j];
        j += 1;
    }
}

/// Row-major `b` with `k` rows of `n`, transposing it first when needed.
fn rows_of_b<'b, T: Element>(dims: &GemmDims, b: &'b [T]) -> Cow<'b, [T]> {
    if !dims.trans_b {
        return Cow::Borrowed(b);
    }
    let mut rows = Vec::with_capacity(dims.k * dims.n);
    for p in 0..dims.k {
        for j in 0..dims.n {
            rows.push(dims.b_at(b, p, j));
        }
    }
    Cow::Owned(rows)
}

pub fn gemm<T: Element>(dims: &GemmDims, a: &[T], b: &[T], c: &mut [T]) {
    let b = rows_of_b(dims, b);
    for i in 0..dims.m {
        let row = &mut c[i * dims.n..(i + 1) * dims.n];
        row.fill(T::zero());
        for p in 0..dims.k {
            axpy(dims.a_at(a, i, p), &b[p * dims.n..(p + 1) * dims.n], row);
        }
    }
}

/// Unit stride, no padding. Other geometries go through the reference
/// kernel.
pub fn conv_2d_valid_acc<T: Element>(
    g: &Conv2dGeometry,
    flipped: bool,
    input: &[T],
    kernel: &[T],
    out: &mut [T],
) {
    if !g.unit() {
        naive::conv_2d_valid_acc(g, flipped, input, kernel, out);
        return;
    }
    for i in 0..g.oh {
        let row = &mut out[i * g.ow..(i + 1) * g.ow];
        for a in 0..g.kh {
            let src = &input[(i + a) * g.iw..];
            for b in 0..g.kw {
                axpy(g.weight(kernel, flipped, a, b), &src[b..b + g.ow], row);
            }
        }
    }
}

pub fn conv_2d_valid<T: Element>(
    g: &Conv2dGeometry,
    flipped: bool,
    input: &[T],
    kernel: &[T],
    out: &mut [T],
) {
    out.fill(T::zero());
    conv_2d_valid_acc(g, flipped, input, kernel, out);
}

pub fn conv_4d_valid<T: Element>(
    g: &Conv4dGeometry,
    flipped: bool,
    input: &[T],
    kernel: &[T],
    out: &mut [T],
) {
    let (in_plane, k_plane, out_plane) = (
        g.plane.input_len(),
        g.plane.kernel_len(),
        g.plane.output_len(),
    );
    out.fill(T::zero());
    for n in 0..g.batch {
        for k in 0..g.out_channels {
            let o = (n * g.out_channels + k) * out_plane;
            for c in 0..g.in_channels {
                let x = (n * g.in_channels + c) * in_plane;
                let w = (k * g.in_channels + c) * k_plane;
                conv_2d_valid_acc(
                    &g.plane,
                    flipped,
                    &input[x..x + in_plane],
                    &kernel[w..w + k_plane],
                    &mut out[o..o + out_plane],
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ramp(n: usize, scale: f32) -> Vec<f32> {
        (0..n).map(|x| (x as f32 * scale).sin()).collect()
    }

    #[test]
    fn gemm_matches_reference_bit_for_bit() {
        for (m, n, k) in [(3, 5, 7), (17, 9, 4), (1, 33, 6)] {
            let a = ramp(m * k, 0.37);
            let b = ramp(k * n, 0.11);
            let dims = GemmDims::new(m, n, k);
            let mut expected = vec![0.0; m * n];
            let mut actual = vec![1.0; m * n];
            naive::gemm(&dims, &a, &b, &mut expected);
            gemm(&dims, &a, &b, &mut actual);
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn transposed_b_is_reordered() {
        let a = ramp(4 * 3, 0.5);
        let b_t = ramp(5 * 3, 0.25);
        let dims = GemmDims::new(4, 5, 3).transposed(false, true);
        let mut expected = vec![0.0; 20];
        let mut actual = vec![0.0; 20];
        naive::gemm(&dims, &a, &b_t, &mut expected);
        gemm(&dims, &a, &b_t, &mut actual);
        assert_eq!(expected, actual);
    }

    #[test]
    fn conv_matches_reference() {
        let g = Conv4dGeometry {
            batch: 2,
            in_channels: 3,
            out_channels: 2,
            plane: Conv2dGeometry::valid([12, 19], [3, 4], [1, 1], [0, 0]),
        };
        let input = ramp(g.input_len(), 0.3);
        let kernel = ramp(g.kernel_len(), 0.7);
        let mut expected = vec![0.0; g.output_len()];
        let mut actual = vec![0.0; g.output_len()];
        for flipped in [false, true] {
            naive::conv_4d_valid(&g, flipped, &input, &kernel, &mut expected);
            conv_4d_valid(&g, flipped, &input, &kernel, &mut actual);
            assert_eq!(expected, actual);
        }
    }
}
