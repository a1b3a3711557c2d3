//! Host side of the GPU kernels: staging operands on the device, launching,
//! and copying the result back into host memory.
//!
//! A leaf operand that already has a mirror on the same device is used in
//! place, after [`Tensor::ensure_device`](crate::tensor::Tensor::ensure_device).
//! Any other operand is uploaded to a staging buffer that is released once
//! the kernel has run.
use log::trace;

use crate::backend::{Conv4dGeometry, GemmDims, Pool2dGeometry};
use crate::element::Element;
use crate::expr::Expr;
use crate::gpu::{same_device, DeviceBuffer, PoolKind, SharedDevice};
use crate::shape::StorageOrder;

enum Staging<'e> {
    Resident(&'e DeviceBuffer),
    Owned(DeviceBuffer),
}

struct Staged<'d, 'e, T: Element> {
    device: &'d SharedDevice<T>,
    staging: Staging<'e>,
}

impl<'d, 'e, T: Element> Staged<'d, 'e, T> {
    /// Only a row-major leaf can use its mirror in place. Anything else is
    /// normalised on the host and uploaded.
    fn new(device: &'d SharedDevice<T>, operand: &'e Expr<'_, T>) -> Self {
        if let Some(tensor) = operand.leaf_tensor() {
            let resident = tensor
                .device()
                .map(|d| same_device(d, device))
                .unwrap_or(false);
            if resident && tensor.order() == StorageOrder::RowMajor {
                trace!("Using resident device buffer of tensor {}", tensor.id());
                return Staged {
                    device,
                    staging: Staging::Resident(tensor.ensure_device()),
                };
            }
        }
        let host = operand.contiguous();
        let buffer = device.allocate(host.len());
        device.upload(&host, &buffer);
        Staged {
            device,
            staging: Staging::Owned(buffer),
        }
    }

    fn buffer(&self) -> &DeviceBuffer {
        match &self.staging {
            Staging::Resident(buffer) => buffer,
            Staging::Owned(buffer) => buffer,
        }
    }
}

impl<'d, 'e, T: Element> Drop for Staged<'d, 'e, T> {
    fn drop(&mut self) {
        if let Staging::Owned(buffer) = &self.staging {
            self.device.release(buffer);
        }
    }
}

/// Runs `launch` against a fresh output buffer and downloads it into `out`.
fn with_output<T: Element, F: FnOnce(&DeviceBuffer)>(
    device: &SharedDevice<T>,
    out: &mut [T],
    launch: F,
) {
    let output = device.allocate(out.len());
    launch(&output);
    device.download(&output, out);
    device.release(&output);
}

pub fn gemm<T: Element>(
    device: &SharedDevice<T>,
    dims: &GemmDims,
    a: &Expr<'_, T>,
    b: &Expr<'_, T>,
    out: &mut [T],
) {
    let (a, b) = (Staged::new(device, a), Staged::new(device, b));
    with_output(device, out, |c| device.gemm(dims, a.buffer(), b.buffer(), c));
}

pub fn conv_4d_valid<T: Element>(
    device: &SharedDevice<T>,
    geometry: &Conv4dGeometry,
    flipped: bool,
    input: &Expr<'_, T>,
    kernel: &Expr<'_, T>,
    out: &mut [T],
) {
    let (input, kernel) = (Staged::new(device, input), Staged::new(device, kernel));
    with_output(device, out, |o| {
        device.conv_4d_valid(geometry, flipped, input.buffer(), kernel.buffer(), o)
    });
}

pub fn pool_2d<T: Element>(
    device: &SharedDevice<T>,
    kind: PoolKind,
    geometry: &Pool2dGeometry,
    input: &Expr<'_, T>,
    out: &mut [T],
) {
    let input = Staged::new(device, input);
    with_output(device, out, |o| device.pool_2d(kind, geometry, input.buffer(), o));
}
