pub use crate::element::{Element, Integral, Real};
pub use crate::error::TensorError;
pub use crate::evaluator::{AssignKind, Assignment};
pub use crate::expr::*;
pub use crate::gpu::{Device, EmulatedDevice, Kernel, SharedDevice};
pub use crate::select::{
    force_conv, force_gemm, force_pool, ConvImpl, DispatchContext, Features, GemmImpl, PoolImpl,
};
pub use crate::shape::{Shape, StorageOrder};
pub use crate::temporary::*;
pub use crate::tensor::{Residency, SubTensor, Tensor};
pub use crate::view::*;
pub use crate::Complex;
