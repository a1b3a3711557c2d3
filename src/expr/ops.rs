use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

use crate::element::{Element, Integral};
use crate::expr::Expr;
use crate::op::{BinaryOp, UnaryOp};
use crate::tensor::{SubTensor, Tensor};

macro_rules! binary_operator {
    ($bound:ident, $trait:ident, $method:ident, $op:ident) => {
        impl<'a, T: $bound, R: Into<Expr<'a, T>>> $trait<R> for Expr<'a, T> {
            type Output = Expr<'a, T>;

            fn $method(self, rhs: R) -> Expr<'a, T> {
                Expr::binary(self, rhs.into(), BinaryOp::$op())
            }
        }

        impl<'a, T: $bound, R: Into<Expr<'a, T>>> $trait<R> for &'a Tensor<T> {
            type Output = Expr<'a, T>;

            fn $method(self, rhs: R) -> Expr<'a, T> {
                Expr::binary(Expr::borrowed(self), rhs.into(), BinaryOp::$op())
            }
        }
    };
}

binary_operator!(Element, Add, add, add);
binary_operator!(Element, Sub, sub, sub);
binary_operator!(Element, Mul, mul, mul);
binary_operator!(Element, Div, div, div);
binary_operator!(Integral, Rem, rem, rem);

impl<'a, T: Element> Neg for Expr<'a, T> {
    type Output = Expr<'a, T>;

    fn neg(self) -> Expr<'a, T> {
        Expr::unary(self, UnaryOp::neg())
    }
}

impl<'a, T: Element> Neg for &'a Tensor<T> {
    type Output = Expr<'a, T>;

    fn neg(self) -> Expr<'a, T> {
        Expr::unary(Expr::borrowed(self), UnaryOp::neg())
    }
}

/// `scalar op expression` for the primitive element types.
macro_rules! scalar_lhs {
    ($t:ty => $($trait:ident, $method:ident, $op:ident);*) => {
        $(
            impl<'a> $trait<Expr<'a, $t>> for $t {
                type Output = Expr<'a, $t>;

                fn $method(self, rhs: Expr<'a, $t>) -> Expr<'a, $t> {
                    Expr::binary(Expr::scalar(self), rhs, BinaryOp::$op())
                }
            }

            impl<'a> $trait<&'a Tensor<$t>> for $t {
                type Output = Expr<'a, $t>;

                fn $method(self, rhs: &'a Tensor<$t>) -> Expr<'a, $t> {
                    Expr::binary(Expr::scalar(self), Expr::borrowed(rhs), BinaryOp::$op())
                }
            }
        )*
    };
}

scalar_lhs!(f32 => Add, add, add; Sub, sub, sub; Mul, mul, mul; Div, div, div);
scalar_lhs!(f64 => Add, add, add; Sub, sub, sub; Mul, mul, mul; Div, div, div);
scalar_lhs!(i32 => Add, add, add; Sub, sub, sub; Mul, mul, mul; Div, div, div; Rem, rem, rem);
scalar_lhs!(i64 => Add, add, add; Sub, sub, sub; Mul, mul, mul; Div, div, div; Rem, rem, rem);

macro_rules! compound_assign {
    ($bound:ident, $trait:ident, $method:ident, $assign:ident) => {
        impl<'e, T: $bound, E: Into<Expr<'e, T>>> $trait<E> for Tensor<T> {
            fn $method(&mut self, rhs: E) {
                self.$assign(rhs);
            }
        }

        impl<'t, 'e, T: $bound, E: Into<Expr<'e, T>>> $trait<E> for SubTensor<'t, T> {
            fn $method(&mut self, rhs: E) {
                self.$assign(rhs);
            }
        }
    };
}

compound_assign!(Element, AddAssign, add_assign, assign_add);
compound_assign!(Element, SubAssign, sub_assign, assign_sub);
compound_assign!(Element, MulAssign, mul_assign, assign_mul);
compound_assign!(Element, DivAssign, div_assign, assign_div);
compound_assign!(Integral, RemAssign, rem_assign, assign_rem);

#[cfg(test)]
mod test {
    use crate::tensor::Tensor;

    #[test]
    fn scalar_on_either_side() {
        let a = Tensor::fast_vector([1.0_f64, 2.0, 4.0]);
        assert_eq!((2.0_f64 * &a).to_vec(), vec![2.0, 4.0, 8.0]);
        assert_eq!((1.0_f64 - &a * 2.0).to_vec(), vec![-1.0, -3.0, -7.0]);
        assert_eq!((8.0_f64 / (&a + 0.0)).to_vec(), vec![8.0, 4.0, 2.0]);
    }

    #[test]
    fn remainder_on_integers() {
        let a = Tensor::fast_vector([7_i32, 8, 9]);
        let b = Tensor::fast_vector([2_i32, 3, 4]);
        assert_eq!((&a % &b).to_vec(), vec![1, 2, 1]);
        assert_eq!((10_i32 % &b).to_vec(), vec![0, 1, 2]);
        let mut c = Tensor::fast_vector([5_i64, 6]);
        c %= 4;
        assert_eq!(c.to_vec(), vec![1, 2]);
    }

    #[test]
    fn compound_operators() {
        let mut a = Tensor::fast_vector([1.0_f32, 2.0]);
        let b = Tensor::fast_vector([3.0_f32, 4.0]);
        a += &b;
        assert_eq!(a.to_vec(), vec![4.0, 6.0]);
        a -= 1.0;
        assert_eq!(a.to_vec(), vec![3.0, 5.0]);
        a *= -&b;
        assert_eq!(a.to_vec(), vec![-9.0, -20.0]);
        a /= &b + &b;
        assert_eq!(a.to_vec(), vec![-1.5, -2.5]);
    }

    #[test]
    fn compound_on_sub_tensor() {
        let m = Tensor::fast_matrix([[1, 2], [3, 4]]);
        let row = Tensor::fast_vector([10, 20]);
        let mut second = m.sub_tensor(1);
        second += &row;
        assert_eq!(m.to_vec(), vec![1, 2, 13, 24]);
    }
}
