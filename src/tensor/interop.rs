use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn, ShapeBuilder};

use crate::element::Element;
use crate::error::TensorError;
use crate::shape::{StorageOrder, MAX_RANK};
use crate::tensor::Tensor;

impl<T: Element> Tensor<T> {
    /// Copies any `ndarray` array, in its logical order, into a row-major
    /// tensor.
    pub fn from_ndarray<S, D>(array: &ArrayBase<S, D>) -> Result<Self, TensorError>
    where
        S: Data<Elem = T>,
        D: Dimension,
    {
        let dims = array.shape();
        if dims.is_empty() || dims.len() > MAX_RANK {
            return Err(TensorError::UnsupportedRank {
                dims: dims.to_vec(),
                max_rank: MAX_RANK,
            });
        }
        let data: Vec<T> = array.iter().copied().collect();
        Tensor::from_slice(dims, &data)
    }

    /// Copies the tensor into a dynamic-rank array with the same memory
    /// order.
    pub fn to_ndarray(&self) -> Result<ArrayD<T>, TensorError> {
        let shape = IxDyn(self.dims());
        let data = self.to_vec();
        let array = match self.order() {
            StorageOrder::RowMajor => ArrayD::from_shape_vec(shape, data)?,
            StorageOrder::ColumnMajor => ArrayD::from_shape_vec(shape.f(), data)?,
        };
        Ok(array)
    }
}

#[cfg(test)]
mod test {
    use ndarray::{arr2, Array3, ShapeBuilder};

    use super::*;

    #[test]
    fn ndarray_round_trip_keeps_logical_order() {
        let array = arr2(&[[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let tensor = Tensor::from_ndarray(&array).unwrap();
        assert_eq!(tensor.dims(), &[2, 3]);
        assert_eq!(tensor.get(&[1, 2]), 6.0);
        let back = tensor.to_ndarray().unwrap();
        assert_eq!(back.into_dimensionality::<ndarray::Ix2>().unwrap(), array);
    }

    #[test]
    fn fortran_arrays_are_reordered() {
        let array = Array3::from_shape_vec((2, 2, 2).f(), (0..8).collect()).unwrap();
        let tensor = Tensor::from_ndarray(&array).unwrap();
        assert_eq!(tensor.get(&[1, 0, 0]), 1);
        assert_eq!(tensor.get(&[0, 1, 0]), 2);
    }

    #[test]
    fn column_major_export() {
        let tensor = Tensor::column_major(&[2, 2], &[1, 3, 2, 4]).unwrap();
        let array = tensor.to_ndarray().unwrap();
        assert_eq!(array[[0, 1]], 2);
        assert_eq!(array[[1, 0]], 3);
    }
}
