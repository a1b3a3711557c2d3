use crate::shape::{Shape, StorageOrder};

/// Layout and capability facts about one expression node, computed when the
/// node is built and consulted by the selector and the evaluator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExprTraits {
    pub shape: Shape,
    /// Every dimension was known when the operands were constructed.
    pub is_fast: bool,
    /// Backed by contiguous memory that can be sliced directly.
    pub is_direct: bool,
    /// Flat index `i` reads element `i` of the storage order.
    pub is_linear: bool,
    /// Produces values without a backing index domain.
    pub is_generator: bool,
    pub is_temporary: bool,
    /// Every leaf has a device mirror.
    pub is_gpu: bool,
    pub vectorizable: bool,
}

impl ExprTraits {
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

    pub fn storage_order(&self) -> StorageOrder {
        self.shape.order()
    }

    pub(crate) fn generator(vectorizable: bool) -> Self {
        ExprTraits {
            shape: Shape::scalar(),
            is_fast: true,
            is_direct: false,
            is_linear: true,
            is_generator: true,
            is_temporary: false,
            is_gpu: true,
            vectorizable,
        }
    }

    pub(crate) fn unary(sub: &ExprTraits, op_vectorizable: bool) -> Self {
        ExprTraits {
            shape: sub.shape.clone(),
            is_fast: sub.is_fast,
            is_direct: false,
            is_linear: sub.is_linear,
            is_generator: sub.is_generator,
            is_temporary: false,
            is_gpu: sub.is_gpu,
            vectorizable: op_vectorizable && sub.vectorizable && sub.is_linear,
        }
    }

    pub(crate) fn binary(lhs: &ExprTraits, rhs: &ExprTraits, op_vectorizable: bool) -> Self {
        let shape = if lhs.is_generator {
            rhs.shape.clone()
        } else {
            lhs.shape.clone()
        };
        let same_order = lhs.is_generator
            || rhs.is_generator
            || lhs.storage_order() == rhs.storage_order();
        let is_linear = lhs.is_linear && rhs.is_linear && same_order;
        ExprTraits {
            shape,
            is_fast: lhs.is_fast && rhs.is_fast,
            is_direct: false,
            is_linear,
            is_generator: lhs.is_generator && rhs.is_generator,
            is_temporary: false,
            is_gpu: lhs.is_gpu && rhs.is_gpu,
            vectorizable: op_vectorizable && lhs.vectorizable && rhs.vectorizable && is_linear,
        }
    }

    /// True when the lane loop can write this expression into a contiguous
    /// destination walked in `order`.
    pub fn lane_compatible(&self, order: StorageOrder) -> bool {
        self.vectorizable
            && self.is_linear
            && (self.is_generator || self.storage_order() == order)
    }

    /// True when the flat index of this expression can be used directly for
    /// a destination walked in `order`.
    pub fn flat_compatible(&self, order: StorageOrder) -> bool {
        self.is_linear && (self.is_generator || self.storage_order() == order)
    }
}
