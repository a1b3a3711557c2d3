use std::fmt;

/// Highest rank an expression may have.
pub const MAX_RANK: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageOrder {
    RowMajor,
    ColumnMajor,
}

impl Default for StorageOrder {
    fn default() -> Self {
        StorageOrder::RowMajor
    }
}

/// Dimensions plus the order in which flat indices walk them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
    order: StorageOrder,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Shape::with_order(dims, StorageOrder::RowMajor)
    }

    pub fn with_order(dims: &[usize], order: StorageOrder) -> Self {
        contract!(
            dims.len() <= MAX_RANK,
            "Rank {} exceeds the maximum of {}",
            dims.len(),
            MAX_RANK
        );
        Shape {
            dims: dims.to_vec(),
            order,
        }
    }

    /// Rank 0 shape of a broadcast scalar.
    pub fn scalar() -> Self {
        Shape {
            dims: Vec::new(),
            order: StorageOrder::RowMajor,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn dim(&self, d: usize) -> usize {
        contract!(
            d < self.dims.len(),
            "Dimension {} requested from a rank {} shape",
            d,
            self.dims.len()
        );
        self.dims[d]
    }

    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn order(&self) -> StorageOrder {
        self.order
    }

    pub fn reordered(&self, order: StorageOrder) -> Shape {
        Shape {
            dims: self.dims.clone(),
            order,
        }
    }

    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![0; self.dims.len()];
        let mut acc = 1;
        match self.order {
            StorageOrder::RowMajor => {
                for d in (0..self.dims.len()).rev() {
                    strides[d] = acc;
                    acc *= self.dims[d];
                }
            }
            StorageOrder::ColumnMajor => {
                for d in 0..self.dims.len() {
                    strides[d] = acc;
                    acc *= self.dims[d];
                }
            }
        }
        strides
    }

    /// Flat position of a multi-index in this shape's storage order.
    #[inline]
    pub fn offset(&self, index: &[usize]) -> usize {
        contract!(
            index.len() == self.dims.len(),
            "Index {:?} does not match rank of {}",
            index,
            self
        );
        contract!(
            index.iter().zip(self.dims.iter()).all(|(i, d)| i < d),
            "Index {:?} out of range for {}",
            index,
            self
        );
        let mut flat = 0;
        match self.order {
            StorageOrder::RowMajor => {
                for (i, d) in index.iter().zip(self.dims.iter()) {
                    flat = flat * d + i;
                }
            }
            StorageOrder::ColumnMajor => {
                for (i, d) in index.iter().zip(self.dims.iter()).rev() {
                    flat = flat * d + i;
                }
            }
        }
        flat
    }

    /// Inverse of [`Shape::offset`], written into `index[..rank]`.
    #[inline]
    pub fn unravel_into(&self, mut flat: usize, index: &mut [usize]) {
        contract!(
            flat < self.size().max(1),
            "Flat index {} out of range for {}",
            flat,
            self
        );
        match self.order {
            StorageOrder::RowMajor => {
                for d in (0..self.dims.len()).rev() {
                    index[d] = flat % self.dims[d];
                    flat /= self.dims[d];
                }
            }
            StorageOrder::ColumnMajor => {
                for d in 0..self.dims.len() {
                    index[d] = flat % self.dims[d];
                    flat /= self.dims[d];
                }
            }
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        let order = match self.order {
            StorageOrder::RowMajor => "row-major",
            StorageOrder::ColumnMajor => "column-major",
        };
        write!(f, "[{}] {}", dims.join("x"), order)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn size_is_product_of_dims() {
        for dims in [vec![3], vec![2, 5], vec![2, 3, 4], vec![1, 1, 7, 2]] {
            let shape = Shape::new(&dims);
            let product: usize = (0..shape.rank()).map(|d| shape.dim(d)).product();
            assert_eq!(shape.size(), product);
        }
    }

    #[test]
    fn offset_row_and_column_major() {
        let row = Shape::new(&[2, 3]);
        let col = Shape::with_order(&[2, 3], StorageOrder::ColumnMajor);
        assert_eq!(row.offset(&[1, 2]), 5);
        assert_eq!(col.offset(&[1, 2]), 5);
        assert_eq!(row.offset(&[1, 0]), 3);
        assert_eq!(col.offset(&[1, 0]), 1);
        assert_eq!(row.strides(), vec![3, 1]);
        assert_eq!(col.strides(), vec![1, 2]);
    }

    #[test]
    fn unravel_inverts_offset() {
        for order in [StorageOrder::RowMajor, StorageOrder::ColumnMajor] {
            let shape = Shape::with_order(&[2, 3, 4], order);
            let mut index = [0; 3];
            for flat in 0..shape.size() {
                shape.unravel_into(flat, &mut index);
                assert_eq!(shape.offset(&index), flat);
            }
        }
    }

    #[test]
    #[cfg(any(debug_assertions, feature = "checked"))]
    #[should_panic]
    fn out_of_range_index_is_caught() {
        Shape::new(&[2, 2]).offset(&[2, 0]);
    }

    #[test]
    fn display() {
        assert_eq!(Shape::new(&[2, 3]).to_string(), "[2x3] row-major");
    }
}
