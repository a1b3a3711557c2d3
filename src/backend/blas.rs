//! BLAS-style kernels on top of `ndarray::linalg::general_mat_mul`.
//!
//! Convolutions are lowered to a single matrix product per batch entry:
//! im2col for the valid form, gemm followed by col2im for the backward form.
use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewMut2};

use crate::backend::{Conv4dGeometry, GemmDims};
use crate::element::Element;

fn view<T>(rows: usize, cols: usize, data: &[T]) -> ArrayView2<'_, T> {
    match ArrayView2::from_shape((rows, cols), &data[..rows * cols]) {
        Ok(view) => view,
        Err(err) => panic!("Cannot view {} elements as {}x{}: {}", data.len(), rows, cols, err),
    }
}

fn view_mut<T>(rows: usize, cols: usize, data: &mut [T]) -> ArrayViewMut2<'_, T> {
    let len = data.len();
    match ArrayViewMut2::from_shape((rows, cols), &mut data[..rows * cols]) {
        Ok(view) => view,
        Err(err) => panic!("Cannot view {} elements as {}x{}: {}", len, rows, cols, err),
    }
}

pub fn gemm<T: Element>(dims: &GemmDims, a: &[T], b: &[T], c: &mut [T]) {
    let (ar, ac) = dims.a_shape();
    let (br, bc) = dims.b_shape();
    let mut lhs = view(ar, ac, a);
    if dims.trans_a {
        lhs = lhs.reversed_axes();
    }
    let mut rhs = view(br, bc, b);
    if dims.trans_b {
        rhs = rhs.reversed_axes();
    }
    let mut out = view_mut(dims.m, dims.n, c);
    general_mat_mul(T::one(), &lhs, &rhs, T::zero(), &mut out);
}

/// Kernel matrix `[rows, cols * kh * kw]` where `rows` and `cols` are the
/// leading two kernel axes, with every plane already oriented for
/// correlation.
fn kernel_matrix<T: Element>(g: &Conv4dGeometry, flipped: bool, kernel: &[T]) -> Vec<T> {
    let p = &g.plane;
    let k_plane = p.kernel_len();
    let mut matrix = Vec::with_capacity(kernel.len());
    for plane in kernel.chunks(k_plane) {
        for a in 0..p.kh {
            for b in 0..p.kw {
                matrix.push(p.weight(plane, flipped, a, b));
            }
        }
    }
    matrix
}

pub fn conv_4d_valid<T: Element>(
    g: &Conv4dGeometry,
    flipped: bool,
    input: &[T],
    kernel: &[T],
    out: &mut [T],
) {
    let p = &g.plane;
    let [s1, s2] = p.stride;
    let [p1, p2] = p.padding;
    let patch = g.in_channels * p.kernel_len();
    let positions = p.output_len();
    let weights = kernel_matrix(g, flipped, kernel);
    let weights = view(g.out_channels, patch, &weights);

    let mut columns = vec![T::zero(); patch * positions];
    for n in 0..g.batch {
        let x = &input[n * g.in_channels * p.input_len()..];
        for c in 0..g.in_channels {
            for a in 0..p.kh {
                for b in 0..p.kw {
                    let row = ((c * p.kh + a) * p.kw + b) * positions;
                    for i in 0..p.oh {
                        for j in 0..p.ow {
                            let (y, z) = (i * s1 + a, j * s2 + b);
                            columns[row + i * p.ow + j] =
                                if y < p1 || z < p2 || y - p1 >= p.ih || z - p2 >= p.iw {
                                    T::zero()
                                } else {
                                    x[(c * p.ih + y - p1) * p.iw + z - p2]
                                };
                        }
                    }
                }
            }
        }
        let o = n * g.out_channels * positions;
        let mut result = view_mut(g.out_channels, positions, &mut out[o..]);
        general_mat_mul(
            T::one(),
            &weights,
            &view(patch, positions, &columns),
            T::zero(),
            &mut result,
        );
    }
}

pub fn conv_4d_backward<T: Element>(
    g: &Conv4dGeometry,
    flipped: bool,
    input: &[T],
    kernel: &[T],
    out: &mut [T],
) {
    let p = &g.plane;
    let [s1, s2] = p.stride;
    let [p1, p2] = p.padding;
    let patch = g.out_channels * p.kernel_len();
    let positions = p.input_len();
    let weights = kernel_matrix(g, flipped, kernel);
    let weights = view(g.in_channels, patch, &weights).reversed_axes();

    let mut columns = vec![T::zero(); patch * positions];
    out.fill(T::zero());
    for n in 0..g.batch {
        let x = n * g.in_channels * positions;
        {
            let mut cols = view_mut(patch, positions, &mut columns);
            general_mat_mul(
                T::one(),
                &weights,
                &view(g.in_channels, positions, &input[x..]),
                T::zero(),
                &mut cols,
            );
        }
        let o = n * g.out_channels * p.output_len();
        for k in 0..g.out_channels {
            for a in 0..p.kh {
                for b in 0..p.kw {
                    let row = ((k * p.kh + a) * p.kw + b) * positions;
                    for i in 0..p.ih {
                        let y = i * s1 + a;
                        if y < p1 || y - p1 >= p.oh {
                            continue;
                        }
                        for j in 0..p.iw {
                            let z = j * s2 + b;
                            if z < p2 || z - p2 >= p.ow {
                                continue;
                            }
                            let at = o + (k * p.oh + y - p1) * p.ow + z - p2;
                            out[at] = out[at] + columns[row + i * p.iw + j];
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::{naive, Conv2dGeometry};

    fn ramp(n: usize, scale: f64) -> Vec<f64> {
        (0..n).map(|x| (x as f64 * scale).cos()).collect()
    }

    fn assert_close(lhs: &[f64], rhs: &[f64]) {
        assert_eq!(lhs.len(), rhs.len());
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            assert!((l - r).abs() < 1e-9, "{} != {}", l, r);
        }
    }

    #[test]
    fn gemm_agrees_with_reference() {
        for (ta, tb) in [(false, false), (true, false), (false, true), (true, true)] {
            let dims = GemmDims::new(5, 4, 3).transposed(ta, tb);
            let a = ramp(15, 0.3);
            let b = ramp(12, 0.8);
            let mut expected = vec![0.0; 20];
            let mut actual = vec![0.0; 20];
            naive::gemm(&dims, &a, &b, &mut expected);
            gemm(&dims, &a, &b, &mut actual);
            assert_close(&expected, &actual);
        }
    }

    #[test]
    fn im2col_agrees_with_reference() {
        let g = Conv4dGeometry {
            batch: 2,
            in_channels: 2,
            out_channels: 3,
            plane: Conv2dGeometry::valid([6, 5], [3, 2], [2, 1], [1, 1]),
        };
        let input = ramp(g.input_len(), 0.2);
        let kernel = ramp(g.kernel_len(), 0.9);
        let mut expected = vec![0.0; g.output_len()];
        let mut actual = vec![0.0; g.output_len()];
        for flipped in [false, true] {
            naive::conv_4d_valid(&g, flipped, &input, &kernel, &mut expected);
            conv_4d_valid(&g, flipped, &input, &kernel, &mut actual);
            assert_close(&expected, &actual);
        }
    }

    #[test]
    fn col2im_agrees_with_reference() {
        let g = Conv4dGeometry {
            batch: 2,
            in_channels: 3,
            out_channels: 2,
            plane: Conv2dGeometry::backward([3, 4], [3, 3], [2, 2], [1, 0], [0, 0]),
        };
        let input = ramp(g.input_len(), 0.4);
        let kernel = ramp(g.kernel_len(), 0.6);
        let mut expected = vec![0.0; g.output_len()];
        let mut actual = vec![1.0; g.output_len()];
        for flipped in [false, true] {
            naive::conv_4d_backward(&g, flipped, &input, &kernel, &mut expected);
            conv_4d_backward(&g, flipped, &input, &kernel, &mut actual);
            assert_close(&expected, &actual);
        }
    }
}
