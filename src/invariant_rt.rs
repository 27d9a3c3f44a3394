//! RT-safe event signaling for the render and capture paths.
//!
//! Two tiers:
//! - **Tier 1 (RT-safe)**: the callback pushes small integer event ids into a
//!   lock-free SPSC queue.
//! - **Tier 2 (Non-RT)**: the control context drains the queue, logs what
//!   happened and checks contracts in tests.
//!
//! RT code **signals facts**. The control context **judges** them. Nothing in
//! tier 1 allocates, locks, formats or panics.
//!
//! # Example
//!
//! ```ignore
//! // render callback
//! signal_event(&mut tx, EV_TAIL_ZERO_FILLED);
//!
//! // control thread
//! let events = drain_events(&mut rx);
//! assert!(events.contains(&EV_TAIL_ZERO_FILLED));
//! ```

use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, warn};

// ============================================================================
// RT event ids (Tier 1)
// ============================================================================

/// A render request was answered with exactly the requested frame count.
pub const EV_BUFFER_FILLED: u8 = 1;

/// The tail of a render buffer was zero-filled because the target was reached.
pub const EV_TAIL_ZERO_FILLED: u8 = 2;

/// The render path is writing silence because the format could not be encoded.
pub const EV_DEGRADED_SILENCE: u8 = 3;

/// Render reached `Stopped`.
pub const EV_DRAINED: u8 = 4;

/// A render or capture callback panicked and was silenced.
pub const EV_CALLBACK_PANIC: u8 = 5;

/// Capture dropped samples because the transport ring was full.
pub const EV_CAPTURE_OVERFLOW: u8 = 6;

/// Capture reached its target frame count and froze.
pub const EV_CAPTURE_FROZEN: u8 = 7;

// ============================================================================
// Event queue
// ============================================================================

/// Capacity of the event queue. Large enough for several seconds of
/// callbacks between control-side drains.
pub const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Create an event queue pair: producer for the RT side, consumer for control.
pub fn new_event_queue() -> (Producer<u8>, Consumer<u8>) {
    RingBuffer::new(EVENT_QUEUE_CAPACITY)
}

/// Signal an event from the RT path. Dropped silently if the queue is full.
#[inline]
pub fn signal_event(tx: &mut Producer<u8>, id: u8) {
    let _ = tx.push(id);
}

// ============================================================================
// Non-RT side (Tier 2)
// ============================================================================

/// Drain all pending events.
pub fn drain_events(rx: &mut Consumer<u8>) -> Vec<u8> {
    let mut events = Vec::with_capacity(rx.slots());
    while let Ok(id) = rx.pop() {
        events.push(id);
    }
    events
}

/// Count occurrences of each event id.
pub fn count_events(events: &[u8]) -> [usize; 256] {
    let mut counts = [0usize; 256];
    for &id in events {
        counts[id as usize] += 1;
    }
    counts
}

/// Log a drained batch once, with one line per distinct event.
pub fn log_events(events: &[u8]) {
    let counts = count_events(events);
    for (id, &n) in counts.iter().enumerate() {
        if n == 0 {
            continue;
        }
        let id = id as u8;
        match id {
            EV_DEGRADED_SILENCE | EV_CALLBACK_PANIC | EV_CAPTURE_OVERFLOW => {
                warn!("RT event {} x{}", event_name(id), n)
            }
            _ => debug!("RT event {} x{}", event_name(id), n),
        }
    }
}

/// Contract check: every required event was signaled at least once.
///
/// # Panics
/// Panics listing the missing events.
#[cfg(any(test, feature = "ppt"))]
pub fn contract_test_rt(contract_name: &str, events: &[u8], required: &[u8]) {
    let counts = count_events(events);
    let missing: Vec<&str> = required
        .iter()
        .filter(|&&id| counts[id as usize] == 0)
        .map(|&id| event_name(id))
        .collect();

    if !missing.is_empty() {
        let present: Vec<&str> = events
            .iter()
            .map(|&id| event_name(id))
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        panic!(
            "RT Contract '{}' missing events: {:?}. Present: {:?}",
            contract_name, missing, present
        );
    }
}

/// Human-readable event name (diagnostics only).
pub const fn event_name(id: u8) -> &'static str {
    match id {
        EV_BUFFER_FILLED => "BUFFER_FILLED",
        EV_TAIL_ZERO_FILLED => "TAIL_ZERO_FILLED",
        EV_DEGRADED_SILENCE => "DEGRADED_SILENCE",
        EV_DRAINED => "DRAINED",
        EV_CALLBACK_PANIC => "CALLBACK_PANIC",
        EV_CAPTURE_OVERFLOW => "CAPTURE_OVERFLOW",
        EV_CAPTURE_FROZEN => "CAPTURE_FROZEN",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_preserves_order() {
        let (mut tx, mut rx) = new_event_queue();
        signal_event(&mut tx, EV_BUFFER_FILLED);
        signal_event(&mut tx, EV_TAIL_ZERO_FILLED);
        signal_event(&mut tx, EV_BUFFER_FILLED);
        assert_eq!(
            drain_events(&mut rx),
            vec![EV_BUFFER_FILLED, EV_TAIL_ZERO_FILLED, EV_BUFFER_FILLED]
        );
    }

    #[test]
    fn counts_by_id() {
        let counts = count_events(&[EV_DRAINED, EV_DRAINED, EV_BUFFER_FILLED]);
        assert_eq!(counts[EV_DRAINED as usize], 2);
        assert_eq!(counts[EV_BUFFER_FILLED as usize], 1);
        assert_eq!(counts[EV_CAPTURE_FROZEN as usize], 0);
    }

    #[test]
    #[should_panic(expected = "missing events")]
    fn contract_fails_when_event_missing() {
        contract_test_rt("incomplete", &[EV_BUFFER_FILLED], &[EV_BUFFER_FILLED, EV_DRAINED]);
    }

    #[test]
    fn overflow_drops_instead_of_blocking() {
        let (mut tx, mut rx) = new_event_queue();
        for _ in 0..EVENT_QUEUE_CAPACITY + 50 {
            signal_event(&mut tx, EV_BUFFER_FILLED);
        }
        assert_eq!(drain_events(&mut rx).len(), EVENT_QUEUE_CAPACITY);
    }

    #[test]
    fn names() {
        assert_eq!(event_name(EV_DEGRADED_SILENCE), "DEGRADED_SILENCE");
        assert_eq!(event_name(200), "UNKNOWN");
    }
}
