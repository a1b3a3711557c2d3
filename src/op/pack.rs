use crate::element::{Element, MAX_LANES};

/// One register's worth of elements. Only the first `T::LANES` entries are
/// meaningful.
#[derive(Clone, Copy, Debug)]
pub struct Pack<T> {
    lanes: [T; MAX_LANES],
}

impl<T: Element> Pack<T> {
    #[inline]
    pub fn splat(value: T) -> Self {
        Pack {
            lanes: [value; MAX_LANES],
        }
    }

    #[inline]
    pub fn load(src: &[T]) -> Self {
        let mut lanes = [T::zero(); MAX_LANES];
        lanes[..T::LANES].copy_from_slice(&src[..T::LANES]);
        Pack { lanes }
    }

    /// Gathers lanes one by one, for sources that are not contiguous.
    #[inline]
    pub fn from_fn<F: FnMut(usize) -> T>(mut f: F) -> Self {
        let mut lanes = [T::zero(); MAX_LANES];
        for (i, lane) in lanes[..T::LANES].iter_mut().enumerate() {
            *lane = f(i);
        }
        Pack { lanes }
    }

    #[inline]
    pub fn store(&self, dst: &mut [T]) {
        dst[..T::LANES].copy_from_slice(&self.lanes[..T::LANES]);
    }

    #[inline]
    pub fn lane(&self, i: usize) -> T {
        self.lanes[i]
    }

    #[inline]
    pub fn map(mut self, f: fn(T) -> T) -> Self {
        for lane in self.lanes[..T::LANES].iter_mut() {
            *lane = f(*lane);
        }
        self
    }

    #[inline]
    pub fn zip(mut self, other: Pack<T>, f: fn(T, T) -> T) -> Self {
        for (lane, rhs) in self.lanes[..T::LANES]
            .iter_mut()
            .zip(other.lanes[..T::LANES].iter())
        {
            *lane = f(*lane, *rhs);
        }
        self
    }

    /// `self + scale * other`, lane by lane.
    #[inline]
    pub fn mul_add(mut self, scale: T, other: Pack<T>) -> Self {
        for (lane, rhs) in self.lanes[..T::LANES]
            .iter_mut()
            .zip(other.lanes[..T::LANES].iter())
        {
            *lane = *lane + scale * *rhs;
        }
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn load_map_store() {
        let src: Vec<f32> = (0..<f32 as Element>::LANES).map(|x| x as f32).collect();
        let mut dst = vec![0.0_f32; <f32 as Element>::LANES];
        Pack::load(&src).map(|x| x * 2.0).store(&mut dst);
        for (i, v) in dst.iter().enumerate() {
            assert_eq!(*v, 2.0 * i as f32);
        }
    }

    #[test]
    fn mul_add_accumulates() {
        let acc = Pack::splat(1.0_f64).mul_add(2.0, Pack::splat(3.0));
        for i in 0..<f64 as Element>::LANES {
            assert_eq!(acc.lane(i), 7.0);
        }
    }
}
