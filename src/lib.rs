//! Lazy tensor expressions evaluated through fused loops.
//!
//! Expressions built from [`Tensor`](tensor::Tensor) values and operators are
//! not computed until they are assigned. Assignment walks the expression once,
//! forces any temporary sub-expression (matrix products, convolutions,
//! pooling) through the implementation chosen by [`select`], and then writes
//! the result with either a lane loop or a scalar loop.
//!
//! ```ignore
//! use lazyten::prelude::*;
//!
//! let a = Tensor::fast_matrix([[-1.0, 2.0], [5.0, 1.0]]);
//! let b = Tensor::fast_matrix([[2.5, 3.0], [4.0, 1.0]]);
//! let c = Tensor::from_expr(&a + &b);
//! assert_eq!(c.to_vec(), vec![1.5, 5.0, 9.0, 2.0]);
//! ```
extern crate crossbeam_utils;
extern crate ndarray;
extern crate num_traits;
extern crate rand;
extern crate thiserror;

#[macro_use]
extern crate lazy_static;

#[macro_use]
mod macros;

pub mod backend;
pub mod element;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod gpu;
pub mod op;
pub mod prelude;
pub mod select;
pub mod shape;
pub mod temporary;
pub mod tensor;
pub mod traits;
pub mod view;

#[cfg(test)]
mod tests;

pub use num::{Complex, One, Zero};
