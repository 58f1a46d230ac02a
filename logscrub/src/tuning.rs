//! Hardware tuning oracle.
//!
//! All hardware-dependent decisions (vector pre-filter, prefetch behaviour,
//! when a flat transition table still fits in cache) are taken from a plain
//! [`Tuning`] value injected into [`PatternSet`](crate::pattern::PatternSet)
//! build and driver creation, never from process-wide state.

/// Tuning knobs consumed by the automaton and the pre-filter.
#[derive(Clone, Copy, Debug)]
pub struct Tuning {
    /// Use the SSE4.2 any-of pre-filter when the binary and CPU support it.
    pub simd_prefilter: bool,
    /// Transition-row prefetch lookahead in the automaton scan loop.
    /// `0` disables prefetching; the scan path is chosen once per call.
    pub prefetch_distance: u8,
    /// Prefetch locality hint; higher keeps rows in closer cache levels.
    pub prefetch_locality: Locality,
    /// Largest state count for which the full automaton still gets the flat
    /// `states x 256` layout. Above this the row-compressed layout is used.
    pub flat_state_budget: usize,
}

/// Cache locality hint for prefetches, mirroring the `_MM_HINT_T{0,1,2}`
/// levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locality {
    L1,
    L2,
    L3,
}

impl Tuning {
    /// Probes the running CPU. On x86-64 this enables the vector pre-filter
    /// when SSE4.2 is present; elsewhere it returns [`Tuning::conservative`].
    pub fn detect() -> Tuning {
        #[cfg(all(feature = "perf-simd", target_arch = "x86_64"))]
        {
            Tuning {
                simd_prefilter: std::arch::is_x86_feature_detected!("sse4.2"),
                ..Tuning::conservative()
            }
        }
        #[cfg(not(all(feature = "perf-simd", target_arch = "x86_64")))]
        {
            Tuning::conservative()
        }
    }

    /// Scalar-only defaults that are correct on any target.
    pub fn conservative() -> Tuning {
        Tuning {
            simd_prefilter: false,
            prefetch_distance: 1,
            prefetch_locality: Locality::L1,
            // 512 states x 512 B per flat row = 256 KiB, a comfortable L2
            // working set alongside the record window.
            flat_state_budget: 512,
        }
    }
}

impl Default for Tuning {
    fn default() -> Tuning {
        Tuning::detect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservative_disables_simd() {
        let t = Tuning::conservative();
        assert!(!t.simd_prefilter);
        assert!(t.flat_state_budget > 0);
    }
}
