//! Reference kernels. Plain loops over row-major slices, always available.
use crate::backend::{
    Conv2dGeometry, Conv4dGeometry, GemmDims, Pool2dGeometry, Pool3dGeometry,
};
use crate::element::Element;

pub fn gemm<T: Element>(dims: &GemmDims, a: &[T], b: &[T], c: &mut [T]) {
    for i in 0..dims.m {
        for j in 0..dims.n {
            let mut acc = T::zero();
            for p in 0..dims.k {
                acc = acc + dims.a_at(a, i, p) * dims.b_at(b, p, j);
            }
            c[i * dims.n + j] = acc;
        }
    }
}

/// Adds the valid convolution of one plane into `out`.
pub fn conv_2d_valid_acc<T: Element>(
    g: &Conv2dGeometry,
    flipped: bool,
    input: &[T],
    kernel: &[T],
    out: &mut [T],
) {
    let [s1, s2] = g.stride;
    let [p1, p2] = g.padding;
    for i in 0..g.oh {
        for j in 0..g.ow {
            let mut acc = out[i * g.ow + j];
            for a in 0..g.kh {
                let y = i * s1 + a;
                if y < p1 || y - p1 >= g.ih {
                    continue;
                }
                let y = y - p1;
                for b in 0..g.kw {
                    let x = j * s2 + b;
                    if x < p2 || x - p2 >= g.iw {
                        continue;
                    }
                    acc = acc + input[y * g.iw + x - p2] * g.weight(kernel, flipped, a, b);
                }
            }
            out[i * g.ow + j] = acc;
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

pub fn conv_2d_full<T: Element>(
    g: &Conv2dGeometry,
    flipped: bool,
    input: &[T],
    kernel: &[T],
    out: &mut [T],
) {
    for i in 0..g.oh {
        for j in 0..g.ow {
            let mut acc = T::zero();
            for a in 0..g.kh {
                if a > i || i - a >= g.ih {
                    continue;
                }
                for b in 0..g.kw {
                    if b > j || j - b >= g.iw {
                        continue;
                    }
                    // full convolution pairs input (i - a) with kernel a
                    let w = if flipped {
                        kernel[(g.kh - 1 - a) * g.kw + (g.kw - 1 - b)]
                    } else {
                        kernel[a * g.kw + b]
                    };
                    acc = acc + input[(i - a) * g.iw + (j - b)] * w;
                }
            }
            out[i * g.ow + j] = acc;
        }
    }
}

/// Valid convolution of an `[id, ih, iw]` volume with a `[kd, kh, kw]`
/// kernel.
pub fn conv_3d_valid<T: Element>(
    input_dims: [usize; 3],
    kernel_dims: [usize; 3],
    flipped: bool,
    input: &[T],
    kernel: &[T],
    out: &mut [T],
) {
    let [id, ih, iw] = input_dims;
    let [kd, kh, kw] = kernel_dims;
    let (od, oh, ow) = (id - kd + 1, ih - kh + 1, iw - kw + 1);
    for z in 0..od {
        for i in 0..oh {
            for j in 0..ow {
                let mut acc = T::zero();
                for c in 0..kd {
                    for a in 0..kh {
                        for b in 0..kw {
                            let w = if flipped {
                                kernel[(c * kh + a) * kw + b]
                            } else {
                                kernel[((kd - 1 - c) * kh + (kh - 1 - a)) * kw + (kw - 1 - b)]
                            };
                            acc = acc + input[((z + c) * ih + i + a) * iw + j + b] * w;
                        }
                    }
                }
                out[(z * oh + i) * ow + j] = acc;
            }
        }
    }
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

/// Scatters every input element through the kernel. This is the adjoint of
/// [`conv_4d_valid`] with the kernel's channel axes swapped.
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
    let (in_plane, k_plane, out_plane) = (p.input_len(), p.kernel_len(), p.output_len());
    out.fill(T::zero());
    for n in 0..g.batch {
        for c in 0..g.in_channels {
            let x = (n * g.in_channels + c) * in_plane;
            for k in 0..g.out_channels {
                let w = (c * g.out_channels + k) * k_plane;
                let o = (n * g.out_channels + k) * out_plane;
                for i in 0..p.ih {
                    for j in 0..p.iw {
                        let v = input[x + i * p.iw + j];
                        for a in 0..p.kh {
                            let y = i * s1 + a;
                            if y < p1 || y - p1 >= p.oh {
                                continue;
                            }
                            for b in 0..p.kw {
                                let z = j * s2 + b;
                                if z < p2 || z - p2 >= p.ow {
                                    continue;
                                }
                                let at = o + (y - p1) * p.ow + (z - p2);
                                out[at] =
                                    out[at] + v * p.weight(&kernel[w..w + k_plane], flipped, a, b);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// `max` for partially ordered elements. An unordered `b` (NaN) loses.
pub fn larger<T: PartialOrd>(a: T, b: T) -> T {
    if b > a {
        b
    } else {
        a
    }
}

pub fn max_pool_2d<T: Element>(
    g: &Pool2dGeometry,
    max: fn(T, T) -> T,
    input: &[T],
    out: &mut [T],
) {
    for n in 0..g.batch {
        let x = &input[n * g.ih * g.iw..];
        for i in 0..g.oh {
            for j in 0..g.ow {
                let mut m = x[i * g.c1 * g.iw + j * g.c2];
                for a in 0..g.c1 {
                    for b in 0..g.c2 {
                        m = max(m, x[(i * g.c1 + a) * g.iw + j * g.c2 + b]);
                    }
                }
                out[(n * g.oh + i) * g.ow + j] = m;
            }
        }
    }
}

pub fn avg_pool_2d<T: Element>(g: &Pool2dGeometry, input: &[T], out: &mut [T]) {
    let window = T::from_count(g.window());
    for n in 0..g.batch {
        let x = &input[n * g.ih * g.iw..];
        for i in 0..g.oh {
            for j in 0..g.ow {
                let mut acc = T::zero();
                for a in 0..g.c1 {
                    for b in 0..g.c2 {
                        acc = acc + x[(i * g.c1 + a) * g.iw + j * g.c2 + b];
                    }
                }
                out[(n * g.oh + i) * g.ow + j] = acc / window;
            }
        }
    }
}

#[inline]
fn volume_at(g: &Pool3dGeometry, n: usize, z: usize, y: usize, x: usize) -> usize {
    ((n * g.id + z) * g.ih + y) * g.iw + x
}

pub fn max_pool_3d<T: Element>(
    g: &Pool3dGeometry,
    max: fn(T, T) -> T,
    input: &[T],
    out: &mut [T],
) {
    let mut o = 0;
    for n in 0..g.batch {
        for z in 0..g.od {
            for i in 0..g.oh {
                for j in 0..g.ow {
                    let mut m = input[volume_at(g, n, z * g.c1, i * g.c2, j * g.c3)];
                    for c in 0..g.c1 {
                        for a in 0..g.c2 {
                            for b in 0..g.c3 {
                                let at = volume_at(g, n, z * g.c1 + c, i * g.c2 + a, j * g.c3 + b);
                                m = max(m, input[at]);
                            }
                        }
                    }
                    out[o] = m;
                    o += 1;
                }
            }
        }
    }
}

pub fn avg_pool_3d<T: Element>(g: &Pool3dGeometry, input: &[T], out: &mut [T]) {
    let window = T::from_count(g.window());
    let mut o = 0;
    for n in 0..g.batch {
        for z in 0..g.od {
            for i in 0..g.oh {
                for j in 0..g.ow {
                    let mut acc = T::zero();
                    for c in 0..g.c1 {
                        for a in 0..g.c2 {
                            for b in 0..g.c3 {
                                let at = volume_at(g, n, z * g.c1 + c, i * g.c2 + a, j * g.c3 + b);
                                acc = acc + input[at];
                            }
                        }
                    }
                    out[o] = acc / window;
                    o += 1;
                }
            }
        }
    }
}

/// Visits every input position of a 2D pool with the flat index of the
/// pooled cell covering it, or `None` past the floored extent.
fn for_each_covered_2d<F: FnMut(usize, Option<usize>)>(g: &Pool2dGeometry, mut f: F) {
    let mut at = 0;
    for n in 0..g.batch {
        for i in 0..g.ih {
            for j in 0..g.iw {
                let (pi, pj) = (i / g.c1, j / g.c2);
                let cell = if pi < g.oh && pj < g.ow {
                    Some((n * g.oh + pi) * g.ow + pj)
                } else {
                    None
                };
                f(at, cell);
                at += 1;
            }
        }
    }
}

fn for_each_covered_3d<F: FnMut(usize, Option<usize>)>(g: &Pool3dGeometry, mut f: F) {
    let mut at = 0;
    for n in 0..g.batch {
        for z in 0..g.id {
            for i in 0..g.ih {
                for j in 0..g.iw {
                    let (pz, pi, pj) = (z / g.c1, i / g.c2, j / g.c3);
                    let cell = if pz < g.od && pi < g.oh && pj < g.ow {
                        Some(((n * g.od + pz) * g.oh + pi) * g.ow + pj)
                    } else {
                        None
                    };
                    f(at, cell);
                    at += 1;
                }
            }
        }
    }
}

/// 1 where an input element equals the max of its window, 0 elsewhere.
pub fn max_pool_derivative_2d<T: Element>(
    g: &Pool2dGeometry,
    input: &[T],
    pooled: &[T],
    out: &mut [T],
) {
    for_each_covered_2d(g, |at, cell| {
        out[at] = match cell {
            Some(c) if input[at] == pooled[c] => T::one(),
            _ => T::zero(),
        };
    });
}

pub fn max_pool_derivative_3d<T: Element>(
    g: &Pool3dGeometry,
    input: &[T],
    pooled: &[T],
    out: &mut [T],
) {
    for_each_covered_3d(g, |at, cell| {
        out[at] = match cell {
            Some(c) if input[at] == pooled[c] => T::one(),
            _ => T::zero(),
        };
    });
}

pub fn avg_pool_derivative<T: Element>(window: usize, out: &mut [T]) {
    out.fill(T::one() / T::from_count(window));
}

/// Routes each pooled error back to the position that produced the max.
pub fn max_pool_upsample_2d<T: Element>(
    g: &Pool2dGeometry,
    input: &[T],
    pooled: &[T],
    errors: &[T],
    out: &mut [T],
) {
    for_each_covered_2d(g, |at, cell| {
        out[at] = match cell {
            Some(c) if input[at] == pooled[c] => errors[c],
            _ => T::zero(),
        };
    });
}

/// Spreads each pooled error evenly over its window.
pub fn avg_pool_upsample_2d<T: Element>(g: &Pool2dGeometry, errors: &[T], out: &mut [T]) {
    let window = T::from_count(g.window());
    for_each_covered_2d(g, |at, cell| {
        out[at] = match cell {
            Some(c) => errors[c] / window,
            None => T::zero(),
        };
    });
}

#[cfg(test)]
mod test {
    use super::*;

    fn max(a: f64, b: f64) -> f64 {
        a.max(b)
    }

    #[test]
    fn gemm_small() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut c = [0.0; 4];
        gemm(&GemmDims::new(2, 2, 3), &a, &b, &mut c);
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn gemm_transposed_matches_plain() {
        // a^T stored as 3x2, b^T stored as 2x3
        let a_t = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        let b_t = [7.0, 9.0, 11.0, 8.0, 10.0, 12.0];
        let mut c = [0.0; 4];
        gemm(&GemmDims::new(2, 2, 3).transposed(true, true), &a_t, &b_t, &mut c);
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn conv_valid_rotates_kernel() {
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let kernel = [1.0, 0.0, 0.0, 0.0];
        let g = Conv2dGeometry::valid([3, 3], [2, 2], [1, 1], [0, 0]);
        let mut out = [0.0; 4];
        conv_2d_valid(&g, false, &input, &kernel, &mut out);
        // rotated kernel picks the bottom-right element of each window
        assert_eq!(out, [5.0, 6.0, 8.0, 9.0]);
        conv_2d_valid(&g, true, &input, &kernel, &mut out);
        assert_eq!(out, [1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn conv_full_of_delta_is_kernel() {
        let input = [1.0];
        let kernel = [1.0, 2.0, 3.0, 4.0];
        let g = Conv2dGeometry::full([1, 1], [2, 2]);
        let mut out = [0.0; 4];
        conv_2d_full(&g, false, &input, &kernel, &mut out);
        assert_eq!(out, kernel);
        conv_2d_full(&g, true, &input, &kernel, &mut out);
        assert_eq!(out, [4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn pool_2d_values() {
        let input: Vec<f64> = (1..=16).map(f64::from).collect();
        let g = Pool2dGeometry::new(1, [4, 4], 2, 2);
        let mut out = [0.0; 4];
        max_pool_2d(&g, max, &input, &mut out);
        assert_eq!(out, [6.0, 8.0, 14.0, 16.0]);
        avg_pool_2d(&g, &input, &mut out);
        assert_eq!(out, [3.5, 5.5, 11.5, 13.5]);
    }

    #[test]
    fn upsample_past_floor_is_zero() {
        let input: Vec<f64> = (1..=9).map(f64::from).collect();
        let g = Pool2dGeometry::new(1, [3, 3], 2, 2);
        let pooled = [5.0];
        let errors = [2.0];
        let mut out = vec![0.0; 9];
        max_pool_upsample_2d(&g, &input, &pooled, &errors, &mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
        avg_pool_upsample_2d(&g, &errors, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
    }
}
