//! Render lifecycle states.

// IMPORTANT: Do not call assert_invariant or any PPT logging in RT paths to avoid locks/allocs.

/// Lifecycle of a render stream.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    /// Built, stream not started yet.
    Idle = 0,
    /// Stream started, no buffer requested yet.
    Priming = 1,
    /// Producing tone.
    Running = 2,
    /// Target reached or stop requested; output is silence.
    Draining = 3,
    /// Finished. Every further request is answered with silence.
    Stopped = 4,
}

impl RenderState {
    /// Decode the value stored in an atomic status word.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RenderState::Idle,
            1 => RenderState::Priming,
            2 => RenderState::Running,
            3 => RenderState::Draining,
            _ => RenderState::Stopped,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, RenderState::Stopped)
    }
}
