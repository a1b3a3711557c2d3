use thiserror::Error;

/// Errors for the fallible construction paths. Evaluation itself never
/// returns errors; its preconditions are checked with `contract!`.
#[derive(Error, Debug)]
pub enum TensorError {
    #[error("Shape {dims:?} holds {expected} elements but {actual} were provided")]
    DataLength {
        dims: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("Operation {op:?} received mismatched shapes {lhs:?} and {rhs:?}")]
    ShapeMismatch {
        op: String,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    #[error("Shape {dims:?} is not supported (rank must be between 1 and {max_rank})")]
    UnsupportedRank { dims: Vec<usize>, max_rank: usize },
    #[error(transparent)]
    NdArray(#[from] ndarray::ShapeError),
}
