use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::PoisonError;

use crossbeam_utils::sync::ShardedLock;

use crate::backend::{naive, Conv4dGeometry, GemmDims, Pool2dGeometry};
use crate::element::Element;
use crate::gpu::{Device, DeviceBuffer, Kernel, PoolKind};

/// A device whose memory lives on the host. Kernels run the reference
/// implementations, and every transfer is counted so residency behaviour can
/// be observed.
pub struct EmulatedDevice<T> {
    memory: ShardedLock<HashMap<u64, Vec<T>>>,
    kernels: HashSet<Kernel>,
    next_handle: AtomicU64,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    launches: AtomicUsize,
}

impl<T: Element + PartialOrd> EmulatedDevice<T> {
    pub fn new() -> Self {
        EmulatedDevice::with_kernels(&[
            Kernel::Gemm,
            Kernel::Conv4dValid,
            Kernel::MaxPool2d,
            Kernel::AvgPool2d,
        ])
    }

    pub fn with_kernels(kernels: &[Kernel]) -> Self {
        EmulatedDevice {
            memory: ShardedLock::new(HashMap::new()),
            kernels: kernels.iter().copied().collect(),
            next_handle: AtomicU64::new(1),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn live_buffers(&self) -> usize {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn snapshot(&self, buffer: &DeviceBuffer) -> Vec<T> {
        let memory = self.memory.read().unwrap_or_else(PoisonError::into_inner);
        match memory.get(&buffer.handle()) {
            Some(data) => data.clone(),
            None => panic!("Device buffer {} was released", buffer.handle()),
        }
    }

    fn write(&self, buffer: &DeviceBuffer, f: impl FnOnce(&mut [T])) {
        let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
        match memory.get_mut(&buffer.handle()) {
            Some(data) => f(data),
            None => panic!("Device buffer {} was released", buffer.handle()),
        }
    }

    fn launch(&self, kernel: Kernel) {
        contract!(
            self.kernels.contains(&kernel),
            "Kernel {:?} launched on a device without it",
            kernel
        );
        self.launches.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T: Element + PartialOrd> Default for EmulatedDevice<T> {
    fn default() -> Self {
        EmulatedDevice::new()
    }
}

impl<T: Element + PartialOrd> Device<T> for EmulatedDevice<T> {
    fn name(&self) -> &str {
        "emulated"
    }

    fn supports(&self, kernel: Kernel) -> bool {
        self.kernels.contains(&kernel)
    }

    fn allocate(&self, len: usize) -> DeviceBuffer {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, vec![T::zero(); len]);
        DeviceBuffer::new(handle, len)
    }

    fn release(&self, buffer: &DeviceBuffer) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&buffer.handle());
    }

    fn upload(&self, host: &[T], buffer: &DeviceBuffer) {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.write(buffer, |data| data.copy_from_slice(host));
    }

    fn download(&self, buffer: &DeviceBuffer, host: &mut [T]) {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let memory = self.memory.read().unwrap_or_else(PoisonError::into_inner);
        match memory.get(&buffer.handle()) {
            Some(data) => host.copy_from_slice(data),
            None => panic!("Device buffer {} was released", buffer.handle()),
        }
    }

    fn gemm(&self, dims: &GemmDims, a: &DeviceBuffer, b: &DeviceBuffer, c: &DeviceBuffer) {
        self.launch(Kernel::Gemm);
        let (a, b) = (self.snapshot(a), self.snapshot(b));
        self.write(c, |c| naive::gemm(dims, &a, &b, c));
    }

    fn conv_4d_valid(
        &self,
        geometry: &Conv4dGeometry,
        flipped: bool,
        input: &DeviceBuffer,
        kernel: &DeviceBuffer,
        output: &DeviceBuffer,
    ) {
        self.launch(Kernel::Conv4dValid);
        let (input, kernel) = (self.snapshot(input), self.snapshot(kernel));
        self.write(output, |out| {
            naive::conv_4d_valid(geometry, flipped, &input, &kernel, out)
        });
    }

    fn pool_2d(
        &self,
        kind: PoolKind,
        geometry: &Pool2dGeometry,
        input: &DeviceBuffer,
        output: &DeviceBuffer,
    ) {
        let input = self.snapshot(input);
        match kind {
            PoolKind::Max => {
                self.launch(Kernel::MaxPool2d);
                self.write(output, |out| {
                    naive::max_pool_2d(geometry, naive::larger, &input, out)
                });
            }
            PoolKind::Avg => {
                self.launch(Kernel::AvgPool2d);
                self.write(output, |out| naive::avg_pool_2d(geometry, &input, out));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transfers_are_counted() {
        let device = EmulatedDevice::<f32>::new();
        let buffer = device.allocate(3);
        device.upload(&[1.0, 2.0, 3.0], &buffer);
        let mut host = [0.0; 3];
        device.download(&buffer, &mut host);
        assert_eq!(host, [1.0, 2.0, 3.0]);
        assert_eq!((device.uploads(), device.downloads()), (1, 1));
        assert_eq!(device.live_buffers(), 1);
        device.release(&buffer);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn kernel_set_is_configurable() {
        let device = EmulatedDevice::<f64>::with_kernels(&[Kernel::Gemm]);
        assert!(device.supports(Kernel::Gemm));
        assert!(!device.supports(Kernel::MaxPool2d));
    }

    #[test]
    fn device_gemm() {
        let device = EmulatedDevice::<f64>::new();
        let (a, b, c) = (device.allocate(4), device.allocate(4), device.allocate(4));
        device.upload(&[1.0, 2.0, 3.0, 4.0], &a);
        device.upload(&[0.0, 1.0, 1.0, 0.0], &b);
        device.gemm(&GemmDims::new(2, 2, 2), &a, &b, &c);
        let mut host = [0.0; 4];
        device.download(&c, &mut host);
        assert_eq!(host, [2.0, 1.0, 4.0, 3.0]);
        assert_eq!(device.launches(), 1);
    }
}
