//! Dense tensor storage.
//!
//! A [`Tensor`] owns one aligned host buffer behind a [`ShardedLock`] and,
//! optionally, a mirror buffer on a [`Device`](crate::gpu::Device). Reads
//! and writes go through `&self`: expressions keep read guards on the host
//! buffer and the evaluator takes the write guard once every expression
//! guard has been released.
use std::fmt;
use std::sync::{OnceLock, PoisonError};

use aligned_vec::{AVec, ConstAlign};
use crossbeam_utils::sync::{ShardedLock, ShardedLockReadGuard, ShardedLockWriteGuard};
use itertools::Itertools;
use log::trace;
use rand::{distributions::Standard, prelude::Distribution, Rng};
use uuid::Uuid;

use crate::element::{Element, ALIGNMENT};
use crate::error::TensorError;
use crate::expr::Expr;
use crate::gpu::{DeviceBuffer, SharedDevice};
use crate::select::DispatchContext;
use crate::shape::{Shape, StorageOrder, MAX_RANK};

mod interop;
mod residency;

pub use residency::{Residency, Transfer};

use residency::ResidencyCell;

/// Host storage of every tensor, aligned for the widest lane width.
pub type Buffer<T> = AVec<T, ConstAlign<ALIGNMENT>>;

pub type StorageId = Uuid;

pub(crate) fn buffer_from_iter<T, I: IntoIterator<Item = T>>(iter: I) -> Buffer<T> {
    AVec::from_iter(ALIGNMENT, iter)
}

pub(crate) fn zeroed<T: Element>(len: usize) -> Buffer<T> {
    buffer_from_iter(std::iter::repeat(T::zero()).take(len))
}

struct DeviceMirror<T: Element> {
    device: SharedDevice<T>,
    buffer: DeviceBuffer,
}

pub struct Tensor<T: Element> {
    id: StorageId,
    shape: Shape,
    fixed: bool,
    host: ShardedLock<Buffer<T>>,
    residency: ResidencyCell,
    mirror: OnceLock<DeviceMirror<T>>,
}

fn check_rank(dims: &[usize]) -> Result<(), TensorError> {
    if dims.is_empty() || dims.len() > MAX_RANK {
        return Err(TensorError::UnsupportedRank {
            dims: dims.to_vec(),
            max_rank: MAX_RANK,
        });
    }
    Ok(())
}

impl<T: Element> Tensor<T> {
    fn build(shape: Shape, fixed: bool, data: Buffer<T>) -> Self {
        contract!(
            shape.rank() > 0,
            "A tensor needs at least one dimension"
        );
        contract!(
            data.len() == shape.size(),
            "Buffer of {} elements for {}",
            data.len(),
            shape
        );
        Tensor {
            id: Uuid::new_v4(),
            shape,
            fixed,
            host: ShardedLock::new(data),
            residency: ResidencyCell::new(Residency::HostOnly),
            mirror: OnceLock::new(),
        }
    }

    pub fn zeros(dims: &[usize]) -> Self {
        Tensor::zeros_ordered(dims, StorageOrder::RowMajor)
    }

    pub fn zeros_column_major(dims: &[usize]) -> Self {
        Tensor::zeros_ordered(dims, StorageOrder::ColumnMajor)
    }

    pub(crate) fn zeros_ordered(dims: &[usize], order: StorageOrder) -> Self {
        let shape = Shape::with_order(dims, order);
        let data = zeroed(shape.size());
        Tensor::build(shape, false, data)
    }

    pub fn from_elem(dims: &[usize], value: T) -> Self {
        let shape = Shape::new(dims);
        let data = buffer_from_iter(std::iter::repeat(value).take(shape.size()));
        Tensor::build(shape, false, data)
    }

    /// Row-major data.
    pub fn from_slice(dims: &[usize], data: &[T]) -> Result<Self, TensorError> {
        Tensor::from_slice_ordered(dims, data, StorageOrder::RowMajor)
    }

    pub fn from_vec(dims: &[usize], data: Vec<T>) -> Result<Self, TensorError> {
        Tensor::from_slice(dims, &data)
    }

    /// Data laid out column-major, first index fastest.
    pub fn column_major(dims: &[usize], data: &[T]) -> Result<Self, TensorError> {
        Tensor::from_slice_ordered(dims, data, StorageOrder::ColumnMajor)
    }

    fn from_slice_ordered(
        dims: &[usize],
        data: &[T],
        order: StorageOrder,
    ) -> Result<Self, TensorError> {
        check_rank(dims)?;
        let shape = Shape::with_order(dims, order);
        if shape.size() != data.len() {
            return Err(TensorError::DataLength {
                dims: dims.to_vec(),
                expected: shape.size(),
                actual: data.len(),
            });
        }
        Ok(Tensor::build(shape, false, AVec::from_slice(ALIGNMENT, data)))
    }

    pub fn fast_vector<const N: usize>(data: [T; N]) -> Self {
        Tensor::build(Shape::new(&[N]), true, AVec::from_slice(ALIGNMENT, &data))
    }

    pub fn fast_matrix<const R: usize, const C: usize>(data: [[T; C]; R]) -> Self {
        let flat = buffer_from_iter(data.iter().flat_map(|row| row.iter().copied()));
        Tensor::build(Shape::new(&[R, C]), true, flat)
    }

    /// Fills every position from its multi-index, visited in row-major order.
    pub fn from_fn<F: FnMut(&[usize]) -> T>(dims: &[usize], mut f: F) -> Self {
        let shape = Shape::new(dims);
        let data = buffer_from_iter(
            dims.iter()
                .map(|&d| 0..d)
                .multi_cartesian_product()
                .map(|index| f(&index)),
        );
        Tensor::build(shape, false, data)
    }

    /// Uniform samples from `rand`'s standard distribution.
    pub fn random(dims: &[usize]) -> Self
    where
        Standard: Distribution<T>,
    {
        let shape = Shape::new(dims);
        let mut rng = rand::thread_rng();
        let data = buffer_from_iter((0..shape.size()).map(|_| rng.gen::<T>()));
        Tensor::build(shape, false, data)
    }

    /// Evaluates an expression into a new row-major tensor.
    pub fn from_expr<'e, E: Into<Expr<'e, T>>>(expr: E) -> Self {
        Tensor::from_expr_with(expr, &DispatchContext::global())
    }

    pub fn from_expr_with<'e, E: Into<Expr<'e, T>>>(expr: E, ctx: &DispatchContext) -> Self {
        Tensor::from_expr_ordered(expr.into(), StorageOrder::RowMajor, ctx)
    }

    pub(crate) fn from_expr_ordered(
        expr: Expr<'_, T>,
        order: StorageOrder,
        ctx: &DispatchContext,
    ) -> Self {
        let tensor = Tensor::zeros_ordered(expr.dims(), order);
        tensor.assign_with(expr, ctx);
        tensor
    }

    /// A tensor whose only valid copy lives on `device`.
    pub fn zeros_on(device: SharedDevice<T>, dims: &[usize]) -> Self {
        let tensor = Tensor::zeros(dims);
        tensor.attach_device(device);
        tensor.residency.set(Residency::DeviceOnly);
        tensor
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn dim(&self, d: usize) -> usize {
        self.shape.dim(d)
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn size(&self) -> usize {
        self.shape.size()
    }

    pub fn order(&self) -> StorageOrder {
        self.shape.order()
    }

    /// Dimensions were fixed at compile time.
    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Host data in storage order, downloading it first if needed.
    pub fn read(&self) -> ShardedLockReadGuard<'_, Buffer<T>> {
        self.ensure_host();
        self.host.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write access to the host buffer. The caller is responsible for
    /// residency bookkeeping.
    pub(crate) fn write_host(&self) -> ShardedLockWriteGuard<'_, Buffer<T>> {
        self.host.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the host data out, leaving an empty buffer behind for drop.
    pub(crate) fn into_parts(mut self) -> (StorageId, Shape, bool, Buffer<T>) {
        self.ensure_host();
        let host = self.host.get_mut().unwrap_or_else(PoisonError::into_inner);
        let data = std::mem::replace(host, AVec::new(ALIGNMENT));
        (self.id, self.shape.clone(), self.fixed, data)
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.read().to_vec()
    }

    pub fn get(&self, index: &[usize]) -> T {
        let at = self.shape.offset(index);
        self.read()[at]
    }

    pub fn is_finite(&self) -> bool {
        self.read().iter().all(|x| x.is_finite_value())
    }

    /// Writable view of the `i`-th slice along the leading dimension.
    pub fn sub_tensor(&self, i: usize) -> SubTensor<'_, T> {
        contract!(
            self.rank() > 1,
            "Cannot take a sub tensor of rank 1 tensor {}",
            self.shape
        );
        contract!(
            self.order() == StorageOrder::RowMajor,
            "Sub tensors need row-major storage, got {}",
            self.shape
        );
        contract!(
            i < self.dim(0),
            "Sub tensor {} out of range for {}",
            i,
            self.shape
        );
        let shape = Shape::new(&self.dims()[1..]);
        SubTensor {
            parent: self,
            offset: i * shape.size(),
            shape,
        }
    }

    pub fn residency(&self) -> Residency {
        self.residency.get()
    }

    pub fn device(&self) -> Option<&SharedDevice<T>> {
        self.mirror.get().map(|mirror| &mirror.device)
    }

    /// Allocates a mirror on `device`. The host copy stays the valid one.
    pub fn attach_device(&self, device: SharedDevice<T>) {
        let mut fresh = false;
        self.mirror.get_or_init(|| {
            fresh = true;
            let buffer = device.allocate(self.size());
            DeviceMirror { device, buffer }
        });
        contract!(fresh, "Tensor {} already has a device mirror", self.id);
    }

    fn mirror(&self) -> &DeviceMirror<T> {
        match self.mirror.get() {
            Some(mirror) => mirror,
            None => panic!("Tensor {} has no device mirror", self.id),
        }
    }

    pub fn ensure_host(&self) {
        if self.residency.get().host_valid() {
            return;
        }
        let mirror = self.mirror();
        let mut host = self.write_host();
        let (next, transfer) = self.residency.get().ensure_host();
        if transfer == Transfer::Download {
            trace!("Downloading tensor {} from {}", self.id, mirror.device.name());
            mirror.device.download(&mirror.buffer, &mut host);
        }
        self.residency.set(next);
    }

    /// Uploads the host copy if the device copy is stale and returns the
    /// device buffer.
    pub fn ensure_device(&self) -> &DeviceBuffer {
        let mirror = self.mirror();
        if !self.residency.get().device_valid() {
            let host = self.host.read().unwrap_or_else(PoisonError::into_inner);
            let (next, transfer) = self.residency.get().ensure_device();
            if transfer == Transfer::Upload {
                trace!("Uploading tensor {} to {}", self.id, mirror.device.name());
                mirror.device.upload(&host, &mirror.buffer);
            }
            self.residency.set(next);
        }
        &mirror.buffer
    }

    /// Records a write to the device copy.
    pub fn invalidate_host(&self) {
        contract!(
            self.mirror.get().is_some(),
            "Device write recorded on tensor {} without a mirror",
            self.id
        );
        self.residency.set(self.residency.get().invalidate_host());
    }

    /// Records a write to the host copy.
    pub fn invalidate_device(&self) {
        self.residency.set(self.residency.get().invalidate_device());
    }

    /// Exchanges the contents of two tensors of the same shape and storage
    /// order. Device mirrors stay attached and become stale.
    pub fn swap(&self, other: &Tensor<T>) {
        contract!(
            self.shape == other.shape,
            "Cannot swap a tensor of {} with one of {}",
            self.shape,
            other.shape
        );
        if self.id == other.id {
            return;
        }
        self.ensure_host();
        other.ensure_host();
        trace!("Swapping tensors {} and {}", self.id, other.id);
        // lock in id order so two concurrent swaps cannot deadlock
        let (first, second) = if self.id < other.id {
            (self, other)
        } else {
            (other, self)
        };
        let mut first_host = first.write_host();
        let mut second_host = second.write_host();
        std::mem::swap(&mut *first_host, &mut *second_host);
        drop((first_host, second_host));
        self.invalidate_device();
        other.invalidate_device();
    }
}

impl<T: Element> Clone for Tensor<T> {
    /// Deep copy under a new storage id, without a device mirror.
    fn clone(&self) -> Self {
        let data = AVec::from_slice(ALIGNMENT, &self.read());
        Tensor::build(self.shape.clone(), self.fixed, data)
    }
}

impl<T: Element> PartialEq for Tensor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && (self.id == other.id || *self.read() == *other.read())
    }
}

impl<T: Element> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id)
            .field("shape", &self.shape)
            .field("fixed", &self.fixed)
            .field("residency", &self.residency())
            .finish()
    }
}

impl<T: Element> Drop for Tensor<T> {
    fn drop(&mut self) {
        if let Some(mirror) = self.mirror.take() {
            mirror.device.release(&mirror.buffer);
        }
    }
}

/// The `i`-th leading slice of a row-major tensor, usable as an assignment
/// destination.
pub struct SubTensor<'t, T: Element> {
    parent: &'t Tensor<T>,
    offset: usize,
    shape: Shape,
}

impl<'t, T: Element> SubTensor<'t, T> {
    pub fn parent(&self) -> &'t Tensor<T> {
        self.parent
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.parent.read()[self.offset..self.offset + self.shape.size()].to_vec()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::gpu::EmulatedDevice;

    #[test]
    fn fallible_construction() {
        assert!(matches!(
            Tensor::from_slice(&[2, 2], &[1.0_f32, 2.0, 3.0]),
            Err(TensorError::DataLength {
                expected: 4,
                actual: 3,
                ..
            })
        ));
        assert!(matches!(
            Tensor::<f64>::from_vec(&[], vec![]),
            Err(TensorError::UnsupportedRank { .. })
        ));
        let t = Tensor::from_vec(&[2, 3], vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(t.get(&[1, 0]), 4);
        assert_eq!(t.size(), 6);
    }

    #[test]
    fn swap_exchanges_contents() {
        let _ = env_logger::builder().is_test(true).try_init();
        let a = Tensor::fast_matrix([[-1.0_f32, 2.0], [5.0, 1.0], [1.1, 1.9]]);
        let b = Tensor::fast_matrix([[1.0_f32, 3.3], [4.4, 9.0], [10.1, -1.1]]);
        let (id_a, id_b) = (a.id(), b.id());
        a.swap(&b);
        assert_eq!(a.to_vec(), vec![1.0, 3.3, 4.4, 9.0, 10.1, -1.1]);
        assert_eq!(b.to_vec(), vec![-1.0, 2.0, 5.0, 1.0, 1.1, 1.9]);
        assert_eq!((a.id(), b.id()), (id_a, id_b));
        a.swap(&a);
        assert_eq!(a.get(&[2, 0]), 10.1);
    }

    #[test]
    fn swap_downloads_and_marks_mirrors_stale() {
        let device = Arc::new(EmulatedDevice::<f64>::new());
        let a = Tensor::<f64>::zeros_on(device.clone(), &[2]);
        let b = Tensor::fast_vector([3.0, 4.0]);
        b.attach_device(device.clone());
        b.ensure_device();
        assert_eq!(b.residency(), Residency::BothValid);
        a.swap(&b);
        assert_eq!(device.downloads(), 1);
        assert_eq!(a.to_vec(), vec![3.0, 4.0]);
        assert_eq!(b.to_vec(), vec![0.0, 0.0]);
        assert_eq!(a.residency(), Residency::DeviceStaleHostValid);
        assert_eq!(b.residency(), Residency::DeviceStaleHostValid);
    }

    #[test]
    #[should_panic(expected = "Cannot swap")]
    fn swap_needs_equal_shapes() {
        let a = Tensor::<f64>::zeros(&[2, 3]);
        let b = Tensor::<f64>::zeros(&[3, 2]);
        a.swap(&b);
    }

    #[test]
    fn buffers_are_aligned() {
        let t = Tensor::<f32>::zeros(&[7, 3]);
        assert_eq!(t.read().as_ptr() as usize % ALIGNMENT, 0);
    }

    #[test]
    fn column_major_indexing() {
        let t = Tensor::column_major(&[2, 3], &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]).unwrap();
        assert_eq!(t.get(&[0, 2]), 3.0);
        assert_eq!(t.get(&[1, 0]), 4.0);
        assert_eq!(t.order(), StorageOrder::ColumnMajor);
    }

    #[test]
    fn fixed_constructors() {
        let v = Tensor::fast_vector([1.0_f64, 2.0, 3.0]);
        assert!(v.is_fixed());
        assert_eq!(v.dims(), &[3]);
        let m = Tensor::fast_matrix([[1, 2, 3], [4, 5, 6]]);
        assert_eq!(m.dims(), &[2, 3]);
        assert_eq!(m.get(&[1, 2]), 6);
    }

    #[test]
    fn from_fn_visits_row_major() {
        let t = Tensor::from_fn(&[2, 3], |index| (index[0] * 10 + index[1]) as i64);
        assert_eq!(t.to_vec(), vec![0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn clone_takes_new_id() {
        let a = Tensor::from_elem(&[2], 1.5_f32);
        let b = a.clone();
        assert_ne!(a.id(), b.id());
        assert_eq!(a, b);
    }

    #[test]
    fn residency_with_device() {
        let device = Arc::new(EmulatedDevice::<f32>::new());
        let t = Tensor::from_slice(&[2], &[1.0, 2.0]).unwrap();
        assert_eq!(t.residency(), Residency::HostOnly);
        t.attach_device(device.clone());
        t.ensure_device();
        assert_eq!(t.residency(), Residency::BothValid);
        assert_eq!(device.uploads(), 1);
        t.ensure_device();
        assert_eq!(device.uploads(), 1);
        t.invalidate_host();
        assert_eq!(t.residency(), Residency::HostStaleDeviceValid);
        assert_eq!(t.to_vec(), vec![1.0, 2.0]);
        assert_eq!(device.downloads(), 1);
        assert_eq!(t.residency(), Residency::BothValid);
        t.invalidate_device();
        assert_eq!(t.residency(), Residency::DeviceStaleHostValid);
        drop(t);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn device_only_tensor_downloads_on_read() {
        let device = Arc::new(EmulatedDevice::<f64>::new());
        let t = Tensor::zeros_on(device.clone(), &[3]);
        assert_eq!(t.residency(), Residency::DeviceOnly);
        assert_eq!(t.to_vec(), vec![0.0; 3]);
        assert_eq!(device.downloads(), 1);
    }

    #[test]
    fn sub_tensor_bounds() {
        let t = Tensor::from_fn(&[3, 2], |i| (i[0] * 2 + i[1]) as i32);
        let s = t.sub_tensor(1);
        assert_eq!(s.dims(), &[2]);
        assert_eq!(s.to_vec(), vec![2, 3]);
    }
}
