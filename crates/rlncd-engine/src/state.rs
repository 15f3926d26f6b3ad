//! Table-driven state machine shared by all role coders.
//!
//! States and events are small integers. Three states exist for every
//! role: `INVALID` (fatal), `WAIT` (initial, parks the driver), and `DONE`
//! (terminal, also parks). The transition table is dense and every cell
//! not filled by `add_trans` stays `INVALID`; dispatching an event with an
//! `INVALID` target logs an error and forces the coder to `DONE` so stray
//! events fail loudly without wedging a flow.
//!
//! One driver task per coder runs the handler of the current state, then
//! advances to the pending next state. `dispatch_event` is synchronous and
//! callable from any task; while a transition is pending (current != next)
//! further events are ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

pub type StateId = u8;
pub type EventId = u8;

/// Fatal state; never entered deliberately.
pub const STATE_INVALID: StateId = 0;
/// Initial state; the driver parks here until an event fires.
pub const STATE_WAIT: StateId = 1;
/// Terminal state; identical to `WAIT` except housekeeping retires it.
pub const STATE_DONE: StateId = 2;
/// First id available for role-specific states.
pub const STATE_ROLE_BASE: StateId = 3;

struct Tables {
    curr: StateId,
    next: StateId,
    trans: Vec<Vec<StateId>>,
}

/// Per-coder state machine.
pub struct StateEngine {
    coder_id: u64,
    tables: Mutex<Tables>,
    wakeup: Notify,
    running: AtomicBool,
}

impl StateEngine {
    /// Build an engine with `states × events` transitions, all `INVALID`.
    pub fn new(coder_id: u64, states: StateId, events: EventId) -> Self {
        Self {
            coder_id,
            tables: Mutex::new(Tables {
                curr: STATE_WAIT,
                next: STATE_WAIT,
                trans: vec![vec![STATE_INVALID; events as usize]; states as usize],
            }),
            wakeup: Notify::new(),
            running: AtomicBool::new(true),
        }
    }

    /// Mark `from × event -> to` as a valid transition.
    pub fn add_trans(&self, from: StateId, event: EventId, to: StateId) {
        let mut t = self.tables.lock().expect("state tables poisoned");
        t.trans[from as usize][event as usize] = to;
    }

    /// Signal an event.
    ///
    /// Ignored while a transition is pending. An `INVALID` target forces
    /// `DONE`.
    pub fn dispatch_event(&self, event: EventId) {
        {
            let mut t = self.tables.lock().expect("state tables poisoned");
            if t.curr != t.next {
                return;
            }

            let mut next = t.trans[t.curr as usize][event as usize];
            if next == STATE_INVALID {
                tracing::error!(
                    coder = self.coder_id,
                    state = t.curr,
                    event,
                    "invalid event for current state"
                );
                next = STATE_DONE;
            }

            tracing::trace!(
                coder = self.coder_id,
                event,
                from = t.curr,
                to = next,
                "state transition"
            );
            t.next = next;
        }
        self.wakeup.notify_one();
    }

    /// Force a transition without an event (used during `init`).
    pub fn set_state(&self, state: StateId) {
        {
            let mut t = self.tables.lock().expect("state tables poisoned");
            t.next = state;
        }
        self.wakeup.notify_one();
    }

    pub fn curr_state(&self) -> StateId {
        self.tables.lock().expect("state tables poisoned").curr
    }

    pub fn next_state(&self) -> StateId {
        self.tables.lock().expect("state tables poisoned").next
    }

    /// Load the pending state as current. Returns whether the engine is
    /// still running; the driver loop exits on `false`.
    pub fn advance(&self) -> bool {
        let mut t = self.tables.lock().expect("state tables poisoned");
        t.curr = t.next;
        self.running.load(Ordering::Acquire)
    }

    /// Park until a transition is pending or the engine stops.
    pub async fn wait(&self) {
        loop {
            {
                let t = self.tables.lock().expect("state tables poisoned");
                if t.curr != t.next {
                    return;
                }
            }
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            self.wakeup.notified().await;
        }
    }

    /// Stop the engine and wake the driver so it can exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.wakeup.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const STATE_WORK: StateId = STATE_ROLE_BASE;
    const EVENT_GO: EventId = 0;
    const EVENT_STOP: EventId = 1;

    fn engine() -> StateEngine {
        let e = StateEngine::new(1, STATE_ROLE_BASE + 1, 2);
        e.add_trans(STATE_WAIT, EVENT_GO, STATE_WORK);
        e.add_trans(STATE_WORK, EVENT_STOP, STATE_DONE);
        e
    }

    #[test]
    fn starts_in_wait() {
        let e = engine();
        assert_eq!(e.curr_state(), STATE_WAIT);
        assert_eq!(e.next_state(), STATE_WAIT);
    }

    #[test]
    fn valid_event_sets_next_state() {
        let e = engine();
        e.dispatch_event(EVENT_GO);
        assert_eq!(e.next_state(), STATE_WORK);
        assert_eq!(e.curr_state(), STATE_WAIT);

        assert!(e.advance());
        assert_eq!(e.curr_state(), STATE_WORK);
    }

    #[test]
    fn invalid_event_forces_done() {
        let e = engine();
        // STOP is not valid in WAIT.
        e.dispatch_event(EVENT_STOP);
        assert_eq!(e.next_state(), STATE_DONE);
    }

    #[test]
    fn pending_transition_swallows_events() {
        let e = engine();
        e.dispatch_event(EVENT_GO);
        // A second event while WAIT -> WORK is pending is ignored.
        e.dispatch_event(EVENT_STOP);
        assert_eq!(e.next_state(), STATE_WORK);
    }

    #[test]
    fn set_state_bypasses_table() {
        let e = engine();
        e.set_state(STATE_DONE);
        assert_eq!(e.next_state(), STATE_DONE);
    }

    #[tokio::test]
    async fn wait_returns_on_dispatch() {
        let e = std::sync::Arc::new(engine());
        let e2 = e.clone();
        let waiter = tokio::spawn(async move {
            e2.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        e.dispatch_event(EVENT_GO);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait should return after dispatch")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_returns_on_stop() {
        let e = std::sync::Arc::new(engine());
        let e2 = e.clone();
        let waiter = tokio::spawn(async move {
            e2.wait().await;
        });

        e.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait should return after stop")
            .unwrap();
        assert!(!e.advance());
    }
}
