use std::sync::PoisonError;

use crossbeam_utils::sync::ShardedLock;
use log::debug;

use crate::select::{ConvImpl, Features, GemmImpl, PoolImpl};

/// Forced implementation per family. `None` leaves the choice to the
/// default policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    pub gemm: Option<GemmImpl>,
    pub conv: Option<ConvImpl>,
    pub pool: Option<PoolImpl>,
}

lazy_static! {
    /// Process-wide overrides. Single writer: change them only while no
    /// evaluation is in flight.
    static ref GLOBAL_OVERRIDES: ShardedLock<Overrides> = ShardedLock::new(Overrides::default());
}

fn global_overrides() -> Overrides {
    *GLOBAL_OVERRIDES
        .read()
        .unwrap_or_else(PoisonError::into_inner)
}

fn set_global_overrides(overrides: Overrides) {
    *GLOBAL_OVERRIDES
        .write()
        .unwrap_or_else(PoisonError::into_inner) = overrides;
}

/// Configuration of one evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchContext {
    pub gemm: Option<GemmImpl>,
    pub conv: Option<ConvImpl>,
    pub pool: Option<PoolImpl>,
    pub features: Features,
}

impl Default for DispatchContext {
    fn default() -> Self {
        DispatchContext {
            gemm: None,
            conv: None,
            pool: None,
            features: Features::compiled(),
        }
    }
}

impl DispatchContext {
    /// Compiled features plus the process-wide overrides.
    pub fn global() -> Self {
        let overrides = global_overrides();
        DispatchContext {
            gemm: overrides.gemm,
            conv: overrides.conv,
            pool: overrides.pool,
            features: Features::compiled(),
        }
    }

    pub fn with_features(self, features: Features) -> Self {
        DispatchContext { features, ..self }
    }

    pub fn with_gemm(self, gemm: GemmImpl) -> Self {
        DispatchContext {
            gemm: Some(gemm),
            ..self
        }
    }

    pub fn with_conv(self, conv: ConvImpl) -> Self {
        DispatchContext {
            conv: Some(conv),
            ..self
        }
    }

    pub fn with_pool(self, pool: PoolImpl) -> Self {
        DispatchContext {
            pool: Some(pool),
            ..self
        }
    }
}

/// Restores the overrides that were in place before it was created.
#[must_use = "the override is undone when the guard is dropped"]
pub struct OverrideGuard {
    previous: Overrides,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        debug!("Restoring dispatch overrides {:?}", self.previous);
        set_global_overrides(self.previous);
    }
}

fn install(update: impl FnOnce(&mut Overrides)) -> OverrideGuard {
    let previous = global_overrides();
    let mut next = previous;
    update(&mut next);
    debug!("Installing dispatch overrides {:?}", next);
    set_global_overrides(next);
    OverrideGuard { previous }
}

pub fn force_gemm(choice: GemmImpl) -> OverrideGuard {
    install(|o| o.gemm = Some(choice))
}

pub fn force_conv(choice: ConvImpl) -> OverrideGuard {
    install(|o| o.conv = Some(choice))
}

pub fn force_pool(choice: PoolImpl) -> OverrideGuard {
    install(|o| o.pool = Some(choice))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let ctx = DispatchContext::default()
            .with_features(Features::none())
            .with_gemm(GemmImpl::Std)
            .with_pool(PoolImpl::Std);
        assert_eq!(ctx.gemm, Some(GemmImpl::Std));
        assert_eq!(ctx.conv, None);
        assert_eq!(ctx.pool, Some(PoolImpl::Std));
        assert!(!ctx.features.vectorize);
    }

    #[test]
    fn guard_restores_previous() {
        // Std runs every convolution, so concurrent tests still pass.
        let before = DispatchContext::global().conv;
        {
            let _guard = force_conv(ConvImpl::Std);
            assert_eq!(DispatchContext::global().conv, Some(ConvImpl::Std));
        }
        assert_eq!(DispatchContext::global().conv, before);
    }
}
