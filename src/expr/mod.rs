//! Lazy expression graph.
//!
//! An [`Expr`] is a tree of leaves (borrowed or owned tensors, broadcast
//! scalars), elementwise operations, views and temporaries. Nothing is
//! computed until the tree is assigned or reduced.
use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use crossbeam_utils::sync::ShardedLockReadGuard;

use crate::element::Element;
use crate::gpu::SharedDevice;
use crate::op::{BinaryOp, Pack, UnaryOp};
use crate::select::DispatchContext;
use crate::shape::{Shape, StorageOrder, MAX_RANK};
use crate::temporary::Temporary;
use crate::tensor::{Buffer, StorageId, Tensor};
use crate::traits::ExprTraits;
use crate::view::View;

mod functions;
mod ops;
mod reduce;

pub use functions::*;
pub use reduce::{dot, dot_with};

pub(crate) enum LeafData<'a, T: Element> {
    Borrowed(ShardedLockReadGuard<'a, Buffer<T>>),
    Owned(Buffer<T>),
}

impl<'a, T: Element> Deref for LeafData<'a, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        match self {
            LeafData::Borrowed(guard) => &guard[..],
            LeafData::Owned(buffer) => &buffer[..],
        }
    }
}

pub(crate) struct Leaf<'a, T: Element> {
    id: StorageId,
    tensor: Option<&'a Tensor<T>>,
    data: LeafData<'a, T>,
}

pub(crate) enum Node<'a, T: Element> {
    Leaf(Leaf<'a, T>),
    Scalar(T),
    Unary(Box<Expr<'a, T>>, UnaryOp<T>),
    Binary(Box<Expr<'a, T>>, Box<Expr<'a, T>>, BinaryOp<T>),
    View(Box<View<'a, T>>),
    Temporary(Box<Temporary<'a, T>>),
}

pub struct Expr<'a, T: Element> {
    node: Node<'a, T>,
    traits: ExprTraits,
}

impl<'a, T: Element> Expr<'a, T> {
    pub fn scalar(value: T) -> Self {
        Expr {
            node: Node::Scalar(value),
            traits: ExprTraits::generator(T::VECTORIZABLE),
        }
    }

    /// Reads `tensor` in place. The expression holds a read guard on the
    /// host buffer until it is dropped.
    pub fn borrowed(tensor: &'a Tensor<T>) -> Self {
        let traits = ExprTraits {
            shape: tensor.shape().clone(),
            is_fast: tensor.is_fixed(),
            is_direct: true,
            is_linear: true,
            is_generator: false,
            is_temporary: false,
            is_gpu: tensor.device().is_some(),
            vectorizable: T::VECTORIZABLE,
        };
        Expr {
            node: Node::Leaf(Leaf {
                id: tensor.id(),
                tensor: Some(tensor),
                data: LeafData::Borrowed(tensor.read()),
            }),
            traits,
        }
    }

    /// Takes the data of `tensor`, which is consumed.
    pub fn owned(tensor: Tensor<T>) -> Self {
        let (id, shape, fixed, buffer) = tensor.into_parts();
        Expr {
            node: Node::Leaf(Leaf {
                id,
                tensor: None,
                data: LeafData::Owned(buffer),
            }),
            traits: ExprTraits {
                shape,
                is_fast: fixed,
                is_direct: true,
                is_linear: true,
                is_generator: false,
                is_temporary: false,
                is_gpu: false,
                vectorizable: T::VECTORIZABLE,
            },
        }
    }

    pub(crate) fn unary(sub: Expr<'a, T>, op: UnaryOp<T>) -> Self {
        let traits = ExprTraits::unary(&sub.traits, op.vectorizable());
        Expr {
            node: Node::Unary(Box::new(sub), op),
            traits,
        }
    }

    pub(crate) fn binary(lhs: Expr<'a, T>, rhs: Expr<'a, T>, op: BinaryOp<T>) -> Self {
        contract!(
            lhs.traits.is_generator || rhs.traits.is_generator || lhs.dims() == rhs.dims(),
            "Operation {} on mismatched shapes {} and {}",
            op.kind().to_string(),
            lhs.traits.shape,
            rhs.traits.shape
        );
        let traits = ExprTraits::binary(&lhs.traits, &rhs.traits, op.vectorizable());
        Expr {
            node: Node::Binary(Box::new(lhs), Box::new(rhs), op),
            traits,
        }
    }

    pub(crate) fn view(view: View<'a, T>) -> Self {
        let traits = view.traits();
        Expr {
            node: Node::View(Box::new(view)),
            traits,
        }
    }

    pub(crate) fn temporary(temporary: Temporary<'a, T>) -> Self {
        let traits = temporary.traits();
        Expr {
            node: Node::Temporary(Box::new(temporary)),
            traits,
        }
    }

    pub fn traits(&self) -> &ExprTraits {
        &self.traits
    }

    pub fn shape(&self) -> &Shape {
        &self.traits.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.traits.dims()
    }

    pub fn rank(&self) -> usize {
        self.traits.rank()
    }

    pub fn size(&self) -> usize {
        self.traits.size()
    }

    /// Value at `flat`, counted in this expression's storage order.
    #[inline]
    pub fn value_at(&self, flat: usize) -> T {
        match &self.node {
            Node::Leaf(leaf) => leaf.data[flat],
            Node::Scalar(value) => *value,
            Node::Unary(sub, op) => op.apply(sub.value_at(flat)),
            Node::Binary(lhs, rhs, op) => {
                if self.passes_flat(rhs) {
                    op.apply(lhs.value_at(flat), rhs.value_at(flat))
                } else {
                    let mut index = [0; MAX_RANK];
                    let rank = self.rank();
                    self.traits.shape.unravel_into(flat, &mut index);
                    op.apply(
                        lhs.value_at_nd(&index[..rank]),
                        rhs.value_at_nd(&index[..rank]),
                    )
                }
            }
            Node::View(view) => view.value_at(flat),
            Node::Temporary(temporary) => temporary.result()[flat],
        }
    }

    #[inline]
    pub fn value_at_nd(&self, index: &[usize]) -> T {
        match &self.node {
            Node::Leaf(leaf) => leaf.data[self.traits.shape.offset(index)],
            Node::Scalar(value) => *value,
            Node::Unary(sub, op) => op.apply(sub.value_at_nd(index)),
            Node::Binary(lhs, rhs, op) => op.apply(lhs.value_at_nd(index), rhs.value_at_nd(index)),
            Node::View(view) => view.value_at_nd(index),
            Node::Temporary(temporary) => temporary.result()[self.traits.shape.offset(index)],
        }
    }

    /// `T::LANES` consecutive values starting at `flat`. Only meaningful
    /// when the expression is vectorizable.
    #[inline]
    pub fn load(&self, flat: usize) -> Pack<T> {
        match &self.node {
            Node::Leaf(leaf) => Pack::load(&leaf.data[flat..]),
            Node::Scalar(value) => Pack::splat(*value),
            Node::Unary(sub, op) => op.apply_pack(sub.load(flat)),
            Node::Binary(lhs, rhs, op) => op.apply_pack(lhs.load(flat), rhs.load(flat)),
            Node::View(view) => view.load(flat),
            Node::Temporary(temporary) => Pack::load(&temporary.result()[flat..]),
        }
    }

    /// Both operands of a binary node read `flat` in the node's own order.
    /// The node takes its order from the left operand unless that is a
    /// generator, so only the right one needs checking.
    fn passes_flat(&self, rhs: &Expr<'a, T>) -> bool {
        rhs.traits.is_generator || rhs.traits.storage_order() == self.traits.storage_order()
    }

    /// True if any leaf reads the storage `id`.
    pub fn alias(&self, id: StorageId) -> bool {
        match &self.node {
            Node::Leaf(leaf) => leaf.id == id,
            Node::Scalar(_) => false,
            Node::Unary(sub, _) => sub.alias(id),
            Node::Binary(lhs, rhs, _) => lhs.alias(id) || rhs.alias(id),
            Node::View(view) => view.sub().alias(id),
            Node::Temporary(temporary) => temporary.operands().iter().any(|op| op.alias(id)),
        }
    }

    /// Forces every temporary, depth first and left to right.
    pub fn pre_assign(&self, ctx: &DispatchContext) {
        match &self.node {
            Node::Leaf(_) | Node::Scalar(_) => {}
            Node::Unary(sub, _) => sub.pre_assign(ctx),
            Node::Binary(lhs, rhs, _) => {
                lhs.pre_assign(ctx);
                rhs.pre_assign(ctx);
            }
            Node::View(view) => view.sub().pre_assign(ctx),
            Node::Temporary(temporary) => temporary.force(ctx),
        }
    }

    /// Values in row-major order, borrowed when the storage already is.
    pub(crate) fn contiguous(&self) -> Cow<'_, [T]> {
        contract!(
            !self.traits.is_generator,
            "A broadcast scalar has no contiguous form"
        );
        if self.traits.is_direct && self.traits.storage_order() == StorageOrder::RowMajor {
            if let (Some(start), Some(buffer)) = (self.element_offset(0), self.direct_buffer()) {
                return Cow::Borrowed(&buffer[start..start + self.size()]);
            }
        }
        match &self.node {
            Node::Temporary(temporary) => Cow::Borrowed(temporary.result()),
            _ => Cow::Owned(self.row_major_values()),
        }
    }

    /// Position of `flat` in the leaf buffer of a direct expression.
    pub(crate) fn element_offset(&self, flat: usize) -> Option<usize> {
        match &self.node {
            Node::Leaf(_) => Some(flat),
            Node::View(view) => view.element_offset(flat),
            _ => None,
        }
    }

    fn direct_buffer(&self) -> Option<&[T]> {
        match &self.node {
            Node::Leaf(leaf) => Some(&leaf.data[..]),
            Node::View(view) => view.sub().direct_buffer(),
            _ => None,
        }
    }

    fn row_major_values(&self) -> Vec<T> {
        let size = self.size();
        if self.traits.storage_order() == StorageOrder::RowMajor {
            return (0..size).map(|flat| self.value_at(flat)).collect();
        }
        let logical = Shape::new(self.dims());
        let rank = self.rank();
        let mut index = [0; MAX_RANK];
        (0..size)
            .map(|flat| {
                logical.unravel_into(flat, &mut index);
                self.value_at_nd(&index[..rank])
            })
            .collect()
    }

    pub(crate) fn leaf_tensor(&self) -> Option<&'a Tensor<T>> {
        match &self.node {
            Node::Leaf(leaf) => leaf.tensor,
            _ => None,
        }
    }

    pub(crate) fn as_temporary(&self) -> Option<&Temporary<'a, T>> {
        match &self.node {
            Node::Temporary(temporary) => Some(temporary),
            _ => None,
        }
    }

    /// Device of the first leaf that has a mirror.
    pub(crate) fn find_device(&self) -> Option<SharedDevice<T>> {
        match &self.node {
            Node::Leaf(leaf) => leaf.tensor.and_then(|t| t.device().cloned()),
            Node::Scalar(_) => None,
            Node::Unary(sub, _) => sub.find_device(),
            Node::Binary(lhs, rhs, _) => lhs.find_device().or_else(|| rhs.find_device()),
            Node::View(view) => view.sub().find_device(),
            Node::Temporary(temporary) => temporary.operands().iter().find_map(|op| op.find_device()),
        }
    }

    /// Strips a rank 2 transpose view, reporting whether one was removed.
    pub(crate) fn into_transposed_operand(self) -> (Expr<'a, T>, bool) {
        let Expr { node, traits } = self;
        match node {
            Node::View(view) if view.is_transpose() && traits.rank() == 2 => (view.into_sub(), true),
            node => (Expr { node, traits }, false),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.pre_assign(&DispatchContext::global());
        (0..self.size()).all(|flat| self.value_at(flat).is_finite_value())
    }

    /// Evaluates into a new row-major tensor and returns its data.
    pub fn to_vec(self) -> Vec<T> {
        Tensor::from_expr(self).to_vec()
    }
}

impl<'a, T: Element> From<&'a Tensor<T>> for Expr<'a, T> {
    fn from(tensor: &'a Tensor<T>) -> Self {
        Expr::borrowed(tensor)
    }
}

impl<'a, T: Element> From<Tensor<T>> for Expr<'a, T> {
    fn from(tensor: Tensor<T>) -> Self {
        Expr::owned(tensor)
    }
}

impl<'a, T: Element> From<T> for Expr<'a, T> {
    fn from(value: T) -> Self {
        Expr::scalar(value)
    }
}

impl<'a, T: Element> fmt::Display for Expr<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Node::Leaf(_) => write!(f, "tensor{}", self.traits.shape),
            Node::Scalar(value) => write!(f, "{:?}", value),
            Node::Unary(sub, op) => write!(f, "{}({})", op.kind().to_string(), sub),
            Node::Binary(lhs, rhs, op) => write!(f, "({} {} {})", lhs, op.kind().to_string(), rhs),
            Node::View(view) => write!(f, "{}({})", view.name(), view.sub()),
            Node::Temporary(temporary) => {
                write!(f, "{}(", temporary.name())?;
                for (i, op) in temporary.operands().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", op)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl<'a, T: Element> fmt::Debug for Expr<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expr")
            .field("expr", &self.to_string())
            .field("traits", &self.traits)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn leaf_aliasing() {
        let a = Tensor::from_elem(&[2, 2], 1.0_f32);
        let b = Tensor::from_elem(&[2, 2], 2.0_f32);
        let (id_a, id_b) = (a.id(), b.id());
        let sum = &a + &a;
        assert!(sum.alias(id_a));
        assert!(!sum.alias(id_b));
        drop(sum);
        let scaled = Expr::from(&b) * 3.0;
        assert!(!scaled.alias(id_a));
    }

    #[test]
    fn mixed_orders_read_by_index() {
        let row = Tensor::from_slice(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let col = Tensor::column_major(&[2, 3], &[10.0, 40.0, 20.0, 50.0, 30.0, 60.0]).unwrap();
        let sum = &row + &col;
        assert!(!sum.traits().is_linear);
        assert_eq!(sum.value_at(1), 22.0);
        assert_eq!(sum.value_at_nd(&[1, 0]), 44.0);
        assert_eq!(sum.to_vec(), vec![11.0, 22.0, 33.0, 44.0, 55.0, 66.0]);
    }

    #[test]
    fn owned_leaf_keeps_values() {
        let t = Tensor::from_slice(&[3], &[1, 2, 3]).unwrap();
        let e = Expr::owned(t) + 1;
        assert_eq!(e.value_at(2), 4);
        assert!(!e.alias(StorageId::nil()));
    }

    #[test]
    fn display_names_the_tree() {
        let a = Tensor::from_elem(&[2], 1.0_f64);
        let e = abs(-&a + 2.0);
        assert_eq!(e.to_string(), "abs((minus(tensor[2] row-major) + 2.0))");
    }

    #[test]
    fn transposed_operand_is_stripped() {
        let a = Tensor::<f32>::zeros(&[2, 3]);
        let (inner, transposed) = crate::view::transpose(&a).into_transposed_operand();
        assert!(transposed);
        assert_eq!(inner.dims(), &[2, 3]);
        let (inner, transposed) = Expr::from(&a).into_transposed_operand();
        assert!(!transposed);
        assert_eq!(inner.dims(), &[2, 3]);
    }
}
