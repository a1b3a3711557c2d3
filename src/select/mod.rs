//! Implementation selection for matrix products, convolutions and pooling.
//!
//! Each family has a default policy driven by problem size and the
//! available [`Features`]. A forced choice is honoured when it can run on
//! the problem at hand, and falls back to the default policy with a warning
//! when it cannot.
use std::fmt;

use log::{debug, warn};

mod context;

pub use context::{force_conv, force_gemm, force_pool, DispatchContext, OverrideGuard, Overrides};

/// Largest gemm problem that stays on the vectorized kernel when BLAS is
/// available.
pub const GEMM_VEC_LIMIT: usize = 200 * 200;

/// Gemm problem size above which single precision complex products go to the GPU.
pub const GEMM_GPU_THRESHOLD: usize = 1000 * 1000;

/// 4D convolution output planes above which BLAS lowering is used.
pub const CONV_BLAS_THRESHOLD: usize = 64 * 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GemmImpl {
    Std,
    Vec,
    Blas,
    Gpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConvImpl {
    Std,
    Vec,
    Blas,
    Gpu,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PoolImpl {
    Std,
    Gpu,
}

/// Accelerations available to a dispatch decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Features {
    pub vectorize: bool,
    pub blas: bool,
    pub gpu: bool,
}

impl Features {
    /// What the crate was built with.
    pub fn compiled() -> Self {
        Features {
            vectorize: cfg!(feature = "vectorize"),
            blas: cfg!(feature = "blas"),
            gpu: cfg!(feature = "cuda"),
        }
    }

    /// Reference kernels only.
    pub fn none() -> Self {
        Features {
            vectorize: false,
            blas: false,
            gpu: false,
        }
    }
}

impl Default for Features {
    fn default() -> Self {
        Features::compiled()
    }
}

/// What the selector knows about one temporary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Problem {
    /// Extent used by the size heuristics. Matrix products pass their
    /// output, matrix-vector products their matrix operand.
    pub n1: usize,
    pub n2: usize,
    /// The element type has a lane form.
    pub vectorizable: bool,
    pub complex_single: bool,
    /// The operands live on a device that has the required kernel.
    pub gpu: bool,
    /// The vectorized kernel set covers this operation.
    pub vec_supported: bool,
    /// The BLAS kernel set covers this operation.
    pub blas_supported: bool,
}

impl Problem {
    pub fn size(&self) -> usize {
        self.n1 * self.n2
    }

    fn vec_applies(&self, features: &Features) -> bool {
        features.vectorize && self.vectorizable && self.vec_supported
    }

    fn blas_applies(&self, features: &Features) -> bool {
        features.blas && self.blas_supported
    }

    fn gpu_applies(&self, features: &Features) -> bool {
        features.gpu && self.gpu
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.n1, self.n2)?;
        if self.vectorizable {
            write!(f, " vectorizable")?;
        }
        if self.complex_single {
            write!(f, " complex32")?;
        }
        if self.gpu {
            write!(f, " on-device")?;
        }
        Ok(())
    }
}

fn default_gemm(problem: &Problem, features: &Features) -> GemmImpl {
    if problem.blas_applies(features) {
        if problem.vec_applies(features) && problem.size() <= GEMM_VEC_LIMIT {
            GemmImpl::Vec
        } else {
            GemmImpl::Blas
        }
    } else if problem.vec_applies(features) {
        GemmImpl::Vec
    } else if problem.gpu_applies(features)
        && problem.complex_single
        && problem.size() > GEMM_GPU_THRESHOLD
    {
        GemmImpl::Gpu
    } else {
        GemmImpl::Std
    }
}

fn gemm_feasible(choice: GemmImpl, problem: &Problem, features: &Features) -> bool {
    match choice {
        GemmImpl::Std => true,
        GemmImpl::Vec => problem.vec_applies(features),
        GemmImpl::Blas => problem.blas_applies(features),
        GemmImpl::Gpu => problem.gpu_applies(features),
    }
}

pub fn select_gemm(problem: &Problem, features: &Features, forced: Option<GemmImpl>) -> GemmImpl {
    let choice = match forced {
        Some(choice) if gemm_feasible(choice, problem, features) => choice,
        Some(choice) => {
            warn!(
                "Forced gemm implementation {:?} cannot run {}, falling back",
                choice, problem
            );
            default_gemm(problem, features)
        }
        None => default_gemm(problem, features),
    };
    debug!("gemm {} -> {:?}", problem, choice);
    choice
}

fn default_conv(problem: &Problem, features: &Features) -> ConvImpl {
    if problem.blas_applies(features) && problem.size() > CONV_BLAS_THRESHOLD {
        ConvImpl::Blas
    } else if problem.vec_applies(features) {
        ConvImpl::Vec
    } else if problem.gpu_applies(features) {
        ConvImpl::Gpu
    } else {
        ConvImpl::Std
    }
}

fn conv_feasible(choice: ConvImpl, problem: &Problem, features: &Features) -> bool {
    match choice {
        ConvImpl::Std => true,
        ConvImpl::Vec => problem.vec_applies(features),
        ConvImpl::Blas => problem.blas_applies(features),
        ConvImpl::Gpu => problem.gpu_applies(features),
    }
}

pub fn select_conv(problem: &Problem, features: &Features, forced: Option<ConvImpl>) -> ConvImpl {
    let choice = match forced {
        Some(choice) if conv_feasible(choice, problem, features) => choice,
        Some(choice) => {
            warn!(
                "Forced convolution implementation {:?} cannot run {}, falling back",
                choice, problem
            );
            default_conv(problem, features)
        }
        None => default_conv(problem, features),
    };
    debug!("conv {} -> {:?}", problem, choice);
    choice
}

pub fn select_pool(problem: &Problem, features: &Features, forced: Option<PoolImpl>) -> PoolImpl {
    let default = if problem.gpu_applies(features) {
        PoolImpl::Gpu
    } else {
        PoolImpl::Std
    };
    let choice = match forced {
        Some(PoolImpl::Gpu) if !problem.gpu_applies(features) => {
            warn!("Forced GPU pooling cannot run {}, falling back", problem);
            default
        }
        Some(choice) => choice,
        None => default,
    };
    debug!("pool {} -> {:?}", problem, choice);
    choice
}

#[cfg(test)]
mod test {
    use super::*;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn problem(n1: usize, n2: usize) -> Problem {
        Problem {
            n1,
            n2,
            vectorizable: true,
            complex_single: false,
            gpu: false,
            vec_supported: true,
            blas_supported: true,
        }
    }

    const ALL: Features = Features {
        vectorize: true,
        blas: true,
        gpu: true,
    };

    #[test]
    fn gemm_vec_threshold_with_blas() {
        init();
        assert_eq!(select_gemm(&problem(200, 200), &ALL, None), GemmImpl::Vec);
        assert_eq!(select_gemm(&problem(200, 201), &ALL, None), GemmImpl::Blas);
    }

    #[test]
    fn gemm_without_blas() {
        init();
        let features = Features {
            blas: false,
            ..ALL
        };
        assert_eq!(select_gemm(&problem(500, 500), &features, None), GemmImpl::Vec);
        let scalar = Problem {
            vectorizable: false,
            ..problem(2000, 2000)
        };
        assert_eq!(select_gemm(&scalar, &features, None), GemmImpl::Std);
        let complex = Problem {
            vectorizable: false,
            complex_single: true,
            gpu: true,
            ..problem(2000, 2000)
        };
        assert_eq!(select_gemm(&complex, &features, None), GemmImpl::Gpu);
        assert_eq!(select_gemm(&complex, &Features::none(), None), GemmImpl::Std);
    }

    #[test]
    fn selection_is_deterministic() {
        let p = problem(123, 77);
        let first = select_gemm(&p, &ALL, None);
        for _ in 0..10 {
            assert_eq!(select_gemm(&p, &ALL, None), first);
        }
    }

    #[test]
    fn infeasible_force_falls_back() {
        init();
        let features = Features::none();
        assert_eq!(
            select_gemm(&problem(10, 10), &features, Some(GemmImpl::Blas)),
            GemmImpl::Std
        );
        assert_eq!(
            select_conv(&problem(10, 10), &features, Some(ConvImpl::Gpu)),
            ConvImpl::Std
        );
        assert_eq!(
            select_pool(&problem(10, 10), &features, Some(PoolImpl::Gpu)),
            PoolImpl::Std
        );
        assert_eq!(
            select_gemm(&problem(10, 10), &ALL, Some(GemmImpl::Std)),
            GemmImpl::Std
        );
    }

    #[test]
    fn conv_policy() {
        init();
        assert_eq!(select_conv(&problem(65, 64), &ALL, None), ConvImpl::Blas);
        assert_eq!(select_conv(&problem(64, 64), &ALL, None), ConvImpl::Vec);
        let unsupported = Problem {
            vec_supported: false,
            blas_supported: false,
            ..problem(8, 8)
        };
        assert_eq!(select_conv(&unsupported, &ALL, None), ConvImpl::Std);
        let on_device = Problem {
            gpu: true,
            ..unsupported
        };
        assert_eq!(select_conv(&on_device, &ALL, None), ConvImpl::Gpu);
    }
}
