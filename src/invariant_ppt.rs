//! PPT Invariant System: runtime invariant enforcement with contract tracking.
//!
//! Control-path code asserts invariants as it runs. With the `ppt` feature the
//! ids of every asserted invariant are recorded, so contract tests can check
//! that a whole flow actually passed through the checks it promises.

// IMPORTANT: never call into this module from a render or capture callback.
// Recording takes a lock and may allocate. RT paths use `invariant_rt` instead.

#[cfg(feature = "ppt")]
use lazy_static::lazy_static;
#[cfg(feature = "ppt")]
use std::collections::HashSet;
#[cfg(feature = "ppt")]
use std::sync::Mutex;

/// Tone and capture settings passed range validation.
pub const CONFIG_VALIDATED: u32 = 1;
/// A host descriptor resolved into a usable stream format.
pub const FORMAT_NEGOTIATED: u32 = 2;
/// A render scheduler was built with a frame target matching its duration.
pub const RENDER_TARGET_SET: u32 = 3;
/// A render run reached `Stopped` with the expected frame count.
pub const RENDER_COMPLETED: u32 = 4;
/// A capture froze at exactly its target frame count.
pub const CAPTURE_FROZEN: u32 = 5;
/// Analysis produced finite statistics.
pub const ANALYSIS_COMPLETE: u32 = 6;
/// A verdict was derived from a complete analysis.
pub const VERDICT_REPORTED: u32 = 7;
/// A WAV artifact header matches the stream it was written from.
pub const ARTIFACT_CONSISTENT: u32 = 8;

#[cfg(feature = "ppt")]
lazy_static! {
    static ref INVARIANT_LOG: Mutex<HashSet<u32>> = Mutex::new(HashSet::new());
}

#[cfg(feature = "ppt")]
/// Assert an invariant: records it and panics on failure.
pub fn assert_invariant(id: u32, condition: bool, message: &str, context: Option<&str>) {
    if !condition {
        let full_message = if let Some(ctx) = context {
            format!("Invariant {} failed: {} (context: {})", id, message, ctx)
        } else {
            format!("Invariant {} failed: {}", id, message)
        };
        tracing::error!("{}", full_message);
        panic!("{}", full_message);
    }
    INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(id);
}

#[cfg(not(feature = "ppt"))]
/// Assert an invariant: checks condition and panics on failure.
pub fn assert_invariant(_id: u32, condition: bool, message: &str, _context: Option<&str>) {
    if !condition {
        panic!("Invariant failed: {}", message);
    }
}

#[cfg(feature = "ppt")]
/// Contract test: checks that the listed invariants were asserted.
pub fn contract_test(test_name: &str, required_invariants: &[u32]) {
    let log = INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let missing: Vec<u32> = required_invariants
        .iter()
        .copied()
        .filter(|inv| !log.contains(inv))
        .collect();
    drop(log); // Drop the lock before panicking
    if !missing.is_empty() {
        panic!(
            "Contract test '{}' failed: invariants not enforced: {:?}",
            test_name, missing
        );
    }
}

#[cfg(not(feature = "ppt"))]
/// Contract test: no-op when PPT feature is disabled.
pub fn contract_test(_test_name: &str, _required_invariants: &[u32]) {}

#[cfg(feature = "ppt")]
/// Clear invariant log (for between test runs).
pub fn clear_invariant_log() {
    INVARIANT_LOG
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
}

#[cfg(not(feature = "ppt"))]
/// Clear invariant log: no-op when PPT feature is disabled.
pub fn clear_invariant_log() {}
