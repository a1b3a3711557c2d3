//! Contract with a GPU library.
//!
//! A binding to a real device library implements [`Device`]. Tensors attach
//! a device with [`Tensor::attach_device`](crate::tensor::Tensor::attach_device)
//! and track which side holds valid data through
//! [`Residency`](crate::tensor::Residency).
use std::sync::Arc;

use crate::backend::{Conv4dGeometry, GemmDims, Pool2dGeometry};
use crate::element::Element;

pub mod emulated;

pub use emulated::EmulatedDevice;

/// Kernels a device may or may not provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    Gemm,
    Conv4dValid,
    MaxPool2d,
    AvgPool2d,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Max,
    Avg,
}

/// Opaque handle to device memory holding `len` elements.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeviceBuffer {
    handle: u64,
    len: usize,
}

impl DeviceBuffer {
    pub fn new(handle: u64, len: usize) -> Self {
        DeviceBuffer { handle, len }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// All calls are synchronous: they return once the device work is complete.
pub trait Device<T: Element>: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kernel: Kernel) -> bool;

    fn allocate(&self, len: usize) -> DeviceBuffer;

    fn release(&self, buffer: &DeviceBuffer);

    fn upload(&self, host: &[T], buffer: &DeviceBuffer);

    fn download(&self, buffer: &DeviceBuffer, host: &mut [T]);

    /// Row-major `c = op(a) * op(b)`.
    fn gemm(&self, dims: &GemmDims, a: &DeviceBuffer, b: &DeviceBuffer, c: &DeviceBuffer);

    fn conv_4d_valid(
        &self,
        geometry: &Conv4dGeometry,
        flipped: bool,
        input: &DeviceBuffer,
        kernel: &DeviceBuffer,
        output: &DeviceBuffer,
    );

    fn pool_2d(
        &self,
        kind: PoolKind,
        geometry: &Pool2dGeometry,
        input: &DeviceBuffer,
        output: &DeviceBuffer,
    );
}

pub type SharedDevice<T> = Arc<dyn Device<T>>;

/// Identity comparison of two device handles.
pub(crate) fn same_device<T: Element>(a: &SharedDevice<T>, b: &SharedDevice<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
