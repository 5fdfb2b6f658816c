//! Request-time decision table.
//!
//! `decide` maps a lookup's freshness, the route's fallback mode and whether
//! the key was produced by enumeration to one action. It performs no I/O;
//! the dispatcher carries the action out.

use kiln_core::FallbackMode;
use kiln_storage::Freshness;

/// What the dispatcher does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Serve the stored artifact.
    Serve,
    /// Serve the stored artifact and start (or join) a background rebuild.
    ServeStaleAndRebuild,
    /// Build now and answer with the result.
    BuildBlocking,
    /// Answer `Pending` and build in the background.
    PendingAndBuild,
    /// Answer `NotFound` without building.
    NotFound,
}

impl Action {
    /// True when this action starts or joins a build.
    pub fn builds(&self) -> bool {
        !matches!(self, Self::Serve | Self::NotFound)
    }
}

/// Fallback policy of one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FallbackPolicy {
    mode: FallbackMode,
}

impl FallbackPolicy {
    pub fn new(mode: FallbackMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FallbackMode {
        self.mode
    }

    /// | freshness | known | Disabled | Blocking | NonBlocking |
    /// |---|---|---|---|---|
    /// | Fresh | any | Serve | Serve | Serve |
    /// | Stale | any | ServeStaleAndRebuild | ServeStaleAndRebuild | ServeStaleAndRebuild |
    /// | Missing | yes | BuildBlocking | BuildBlocking | PendingAndBuild |
    /// | Missing | no | NotFound | BuildBlocking | PendingAndBuild |
    pub fn decide(&self, freshness: Freshness, known: bool) -> Action {
        match (freshness, self.mode) {
            (Freshness::Fresh, _) => Action::Serve,
            (Freshness::Stale, _) => Action::ServeStaleAndRebuild,
            (Freshness::Missing, FallbackMode::NonBlocking) => Action::PendingAndBuild,
            (Freshness::Missing, FallbackMode::Blocking) => Action::BuildBlocking,
            (Freshness::Missing, FallbackMode::Disabled) if known => Action::BuildBlocking,
            (Freshness::Missing, FallbackMode::Disabled) => Action::NotFound,
        }
    }
}

impl From<FallbackMode> for FallbackPolicy {
    fn from(mode: FallbackMode) -> Self {
        Self::new(mode)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_mode() -> impl Strategy<Value = FallbackMode> {
        prop_oneof![
            Just(FallbackMode::Disabled),
            Just(FallbackMode::Blocking),
            Just(FallbackMode::NonBlocking),
        ]
    }

    fn arb_freshness() -> impl Strategy<Value = Freshness> {
        prop_oneof![
            Just(Freshness::Fresh),
            Just(Freshness::Stale),
            Just(Freshness::Missing),
        ]
    }

    proptest! {
        /// An available artifact is always served; mode and knownness never turn it into an error.
        #[test]
        fn prop_servable_is_always_served(mode in arb_mode(), freshness in arb_freshness(), known in any::<bool>()) {
            let action = FallbackPolicy::new(mode).decide(freshness, known);
            prop_assert_eq!(
                freshness.is_servable(),
                matches!(action, Action::Serve | Action::ServeStaleAndRebuild)
            );
            prop_assert_eq!(action.builds(), freshness.needs_build() && action != Action::NotFound);
        }
    }
}
