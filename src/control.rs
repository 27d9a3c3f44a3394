//! Control-side handle for a running render.
//!
//! The control thread never touches the scheduler itself. It reads the
//! shared atomics, raises the stop flag, and drains the RT event queue so the
//! callback's facts end up in the log.

use crate::invariant_ppt::{assert_invariant, RENDER_COMPLETED};
use crate::invariant_rt::{drain_events, log_events};
use crate::render::RenderStatus;
use crate::states::RenderState;
use rtrb::Consumer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the control loop wakes while waiting.
pub const CONTROL_TICK: Duration = Duration::from_millis(10);
/// How often progress is logged.
pub const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Handle the control context keeps for one render stream.
pub struct RenderControl {
    status: Arc<RenderStatus>,
    events: Option<Consumer<u8>>,
    sample_rate_hz: u32,
    target_frames: Option<u64>,
    drained: Vec<u8>,
    last_log: Instant,
}

impl RenderControl {
    pub(crate) fn new(
        status: Arc<RenderStatus>,
        events: Option<Consumer<u8>>,
        sample_rate_hz: u32,
        target_frames: Option<u64>,
    ) -> Self {
        Self {
            status,
            events,
            sample_rate_hz,
            target_frames,
            drained: Vec::new(),
            last_log: Instant::now(),
        }
    }

    /// Ask the render callback to stop at its next boundary.
    pub fn request_stop(&self) {
        self.status.request_stop();
    }

    pub fn state(&self) -> RenderState {
        self.status.state()
    }

    pub fn frames_produced(&self) -> u64 {
        self.status.frames_produced()
    }

    /// Seconds of tone produced so far.
    pub fn seconds_produced(&self) -> f64 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.frames_produced() as f64 / f64::from(self.sample_rate_hz)
    }

    pub fn target_frames(&self) -> Option<u64> {
        self.target_frames
    }

    pub fn is_degraded(&self) -> bool {
        self.status.is_degraded()
    }

    pub fn xruns(&self) -> u32 {
        self.status.xruns()
    }

    /// Every RT event drained so far, in arrival order.
    pub fn events(&self) -> &[u8] {
        &self.drained
    }

    /// Drain pending RT events into the log. Returns how many arrived.
    pub fn poll_events(&mut self) -> usize {
        let Some(rx) = self.events.as_mut() else {
            return 0;
        };
        let batch = drain_events(rx);
        log_events(&batch);
        let n = batch.len();
        self.drained.extend_from_slice(&batch);
        n
    }

    /// Log progress if a second has passed since the last line.
    pub fn maybe_log_progress(&mut self) {
        if self.last_log.elapsed() < PROGRESS_LOG_INTERVAL {
            return;
        }
        match self.target_frames {
            Some(target) if self.sample_rate_hz > 0 => info!(
                "Playing: {:.1}s / {:.1}s ({} callbacks, {} xruns)",
                self.seconds_produced(),
                target as f64 / f64::from(self.sample_rate_hz),
                self.status.callbacks(),
                self.status.xruns()
            ),
            _ => info!(
                "Playing: {:.1}s ({} callbacks, {} xruns)",
                self.seconds_produced(),
                self.status.callbacks(),
                self.status.xruns()
            ),
        }
        self.last_log = Instant::now();
    }

    /// Block until the render reaches `Stopped`, a stop is requested through
    /// `interrupted`, or `timeout` elapses.
    ///
    /// Returns the last observed state.
    pub fn wait_until_stopped(
        &mut self,
        timeout: Option<Duration>,
        interrupted: &dyn Fn() -> bool,
    ) -> RenderState {
        let started = Instant::now();
        loop {
            self.poll_events();
            let state = self.state();
            if state.is_finished() {
                break;
            }
            if interrupted() && !self.status.stop_requested() {
                debug!("Stop requested at {:.2}s", self.seconds_produced());
                self.request_stop();
            }
            if timeout.is_some_and(|t| started.elapsed() >= t) {
                warn!(
                    "Render did not finish within {:?} (state {:?})",
                    timeout.unwrap_or_default(),
                    state
                );
                break;
            }
            self.maybe_log_progress();
            std::thread::sleep(CONTROL_TICK);
        }
        self.poll_events();

        let state = self.state();
        if state.is_finished() {
            if let Some(target) = self.target_frames {
                assert_invariant(
                    RENDER_COMPLETED,
                    self.status.stop_requested() || self.frames_produced() == target,
                    "Finished render produced exactly its target",
                    Some("RenderControl::wait_until_stopped"),
                );
            }
            info!(
                "Render finished: {} frames ({:.2}s){}",
                self.frames_produced(),
                self.seconds_produced(),
                if self.is_degraded() { ", degraded to silence" } else { "" }
            );
        }
        state
    }
}
