use std::sync::Arc;

use crate::prelude::*;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn scalar_only() -> DispatchContext {
    DispatchContext::default().with_features(Features::none())
}

fn gpu_enabled() -> DispatchContext {
    DispatchContext::default().with_features(Features {
        vectorize: true,
        blas: false,
        gpu: true,
    })
}

fn ramp(dims: &[usize], step: f64) -> Tensor<f64> {
    let size: usize = dims.iter().product();
    Tensor::from_vec(dims, (0..size).map(|i| (i as f64 * step).sin()).collect()).unwrap()
}

fn close(lhs: &[f64], rhs: &[f64]) -> bool {
    lhs.len() == rhs.len() && lhs.iter().zip(rhs).all(|(a, b)| (a - b).abs() < 1e-9)
}

#[test]
fn elementwise_sum_and_product() {
    init();
    let mut a = Tensor::fast_matrix([[-1.0, 2.0], [5.0, 1.0]]);
    let b = Tensor::fast_matrix([[2.5, 3.0], [4.0, 1.0]]);
    let c = Tensor::from_expr(&a + &b);
    assert_eq!(c.to_vec(), vec![1.5, 5.0, 9.0, 2.0]);
    a *= &b;
    assert_eq!(a.to_vec(), vec![-2.5, 6.0, 20.0, 1.0]);
}

#[test]
fn aliasing_assignments() {
    init();
    let a = Tensor::fast_matrix([[1.0_f32, 2.0], [3.0, 4.0]]);
    a.assign(transpose(&a) * 2.0 + &a);
    assert_eq!(a.to_vec(), vec![3.0, 8.0, 7.0, 12.0]);
    a.assign(mul(&a, transpose(&a)));
    assert_eq!(a.to_vec(), vec![73.0, 117.0, 117.0, 193.0]);
}

#[test]
fn lane_loop_matches_scalar_loop() {
    init();
    let n = 37;
    let x = Tensor::from_fn(&[n], |i| i[0] as f64 / 7.0 - 2.0);
    let y = Tensor::from_fn(&[n], |i| (i[0] % 5) as f64 + 0.5);
    let build = || softplus(&x) * &y + max(&x, 0.0) - sqrt(&y) / 3.0;
    let lane = Tensor::<f64>::zeros(&[n]);
    let scalar = Tensor::<f64>::zeros(&[n]);
    lane.assign_with(build(), &DispatchContext::default());
    scalar.assign_with(build(), &scalar_only());
    assert_eq!(lane.to_vec(), scalar.to_vec());
}

#[test]
fn max_pooling_and_its_derivative() {
    init();
    let input = Tensor::from_fn(&[4, 4], |i| (i[0] * 4 + i[1] + 1) as f64);
    assert_eq!(max_pool_2d(&input, 2, 2).to_vec(), vec![6.0, 8.0, 14.0, 16.0]);

    let derivative = Tensor::from_expr(max_pool_derivative_2d(&input, max_pool_2d(&input, 2, 2), 2, 2));
    for r in 0..4 {
        for c in 0..4 {
            let expected = if r % 2 == 1 && c % 2 == 1 { 1.0 } else { 0.0 };
            assert_eq!(derivative.get(&[r, c]), expected, "at ({}, {})", r, c);
        }
    }
    assert_eq!(avg_pool_derivative_2d(&input, 2, 2).to_vec(), vec![0.25; 16]);
}

#[test]
fn max_pooling_in_three_dimensions() {
    init();
    let input = Tensor::from_fn(&[2, 4, 4], |i| (i[0] * 16 + i[1] * 4 + i[2] + 1) as f32);
    let pooled = Tensor::from_expr(max_pool_3d(&input, 2, 2, 2));
    assert_eq!(pooled.dims(), &[1, 2, 2]);
    assert_eq!(pooled.to_vec(), vec![22.0, 24.0, 30.0, 32.0]);

    let derivative = Tensor::from_expr(max_pool_derivative_3d(&input, &pooled, 2, 2, 2));
    assert_eq!(derivative.to_vec().iter().sum::<f32>(), 4.0);
    for index in [[1, 1, 1], [1, 1, 3], [1, 3, 1], [1, 3, 3]] {
        assert_eq!(derivative.get(&index), 1.0);
    }
}

#[test]
fn repeated_vector_in_arithmetic() {
    let v = Tensor::fast_vector([1, 2]);
    let m = Tensor::fast_matrix([[10, 20, 30], [40, 50, 60]]);
    assert_eq!((rep(&v, &[3]) + &m).to_vec(), vec![11, 21, 31, 42, 52, 62]);
}

#[test]
fn convolution_identities() {
    init();
    let x = ramp(&[6, 7], 0.3);
    let k = ramp(&[3, 2], 0.7);
    let flipped = conv_2d_valid_flipped(&x, &k).to_vec();
    let rotated = conv_2d_valid(&x, fflip(&k)).to_vec();
    assert!(close(&flipped, &rotated));

    let x = ramp(&[1, 2, 6, 6], 0.11);
    let w = ramp(&[3, 2, 3, 3], 0.23);
    let forward = conv_4d_valid(&x, &w);
    assert_eq!(forward.dims(), &[1, 3, 4, 4]);
    let y = ramp(forward.dims(), 0.41);
    let lhs = dot(forward, &y);
    let rhs = dot(&x, conv_4d_backward(&y, &w));
    assert!((lhs - rhs).abs() < 1e-9, "{} != {}", lhs, rhs);
}

#[test]
fn infeasible_choices_fall_back() {
    init();
    let x = ramp(&[5, 5], 0.2);
    let k = ramp(&[2, 2], 0.5);
    let reference = Tensor::from_expr_with(conv_2d_full(&x, &k), &scalar_only()).to_vec();
    let forced = Tensor::from_expr_with(
        conv_2d_full(&x, &k),
        &DispatchContext::default().with_conv(ConvImpl::Vec),
    );
    assert_eq!(forced.to_vec(), reference);

    let a = Tensor::fast_matrix([[1.0, 2.0], [3.0, 4.0]]);
    let on_gpu = Tensor::from_expr_with(mul(&a, &a), &gpu_enabled().with_gemm(GemmImpl::Gpu));
    assert_eq!(on_gpu.to_vec(), vec![7.0, 10.0, 15.0, 22.0]);
}

#[test]
fn residency_across_evaluations() {
    init();
    let device = Arc::new(EmulatedDevice::<f64>::new());
    let a = Tensor::fast_matrix([[1.0, 2.0], [3.0, 4.0]]);
    let b = Tensor::fast_matrix([[1.0, 0.0], [0.0, 1.0]]);
    a.attach_device(device.clone());
    let ctx = gpu_enabled().with_gemm(GemmImpl::Gpu);

    let c = Tensor::from_expr_with(mul(&a, &b), &ctx);
    assert_eq!(c.to_vec(), a.to_vec());
    assert_eq!(a.residency(), Residency::BothValid);
    assert_eq!((device.uploads(), device.downloads(), device.launches()), (2, 1, 1));

    a.assign_add(1.0);
    assert_eq!(a.residency(), Residency::DeviceStaleHostValid);
    let c = Tensor::from_expr_with(mul(&a, &b), &ctx);
    assert_eq!(c.to_vec(), vec![2.0, 3.0, 4.0, 5.0]);
    assert_eq!((device.uploads(), device.downloads(), device.launches()), (4, 2, 2));

    // already valid on both sides
    Tensor::from_expr_with(mul(&a, &b), &ctx);
    assert_eq!(device.uploads(), 5);
    assert_eq!(device.live_buffers(), 1);
}

#[test]
fn slices_written_from_siblings() {
    init();
    let t = Tensor::from_fn(&[2, 2, 2], |i| (i[0] * 4 + i[1] * 2 + i[2]) as f64);
    t.sub_tensor(1).assign(sub(&t, 0) * 2.0 + 1.0);
    assert_eq!(t.to_vec(), vec![0.0, 1.0, 2.0, 3.0, 1.0, 3.0, 5.0, 7.0]);
    let mut first = t.sub_tensor(0);
    first -= sub(&t, 1);
    assert_eq!(first.to_vec(), vec![-1.0, -2.0, -3.0, -4.0]);
}

#[test]
fn reductions_over_temporaries() {
    let a = Tensor::fast_matrix([[1.0_f64, 2.0], [3.0, 4.0]]);
    let v = Tensor::fast_vector([1.0, -1.0]);
    let product = mul(&a, &v);
    assert_eq!(product.sum(), -2.0);
    assert_eq!(dot(mul(&a, &v), &v), 0.0);
}
