//! Pause, resume and single-step control of the event loop
//!
//! The flags live under one mutex paired with a condition variable. The worker
//! checks them and suspends while holding that mutex, so a resume or step sent
//! between the check and the wait cannot be lost.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Pause flags observed by the worker before each event
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PauseState {
    pub paused: bool,
    pub step_requested: bool,
}

#[derive(Debug, Default)]
struct Gate {
    state: PauseState,
    halted: bool,
}

/// What the worker should do after waiting for its turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Turn {
    /// Process the next record; `stepped` when a step request granted it
    Proceed { stepped: bool },
    /// Stop the loop
    Halt,
}

/// Pause/step/resume flags shared between the control side and the worker
#[derive(Debug, Default)]
pub struct PauseController {
    gate: Mutex<Gate>,
    wake: Condvar,
}

impl PauseController {
    /// Create a controller, optionally starting paused
    pub fn new(paused: bool) -> Self {
        Self {
            gate: Mutex::new(Gate {
                state: PauseState {
                    paused,
                    step_requested: false,
                },
                halted: false,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pause before the next event. Returns false if already paused.
    pub fn pause(&self) -> bool {
        let mut gate = self.lock();
        let changed = !gate.state.paused;
        gate.state.paused = true;
        changed
    }

    /// Resume free-running processing. Returns false if not paused.
    pub fn resume(&self) -> bool {
        let mut gate = self.lock();
        let changed = gate.state.paused;
        gate.state.paused = false;
        gate.state.step_requested = false;
        self.wake.notify_all();
        changed
    }

    /// Let exactly one more event through while paused
    ///
    /// Returns false, and does nothing, when not paused.
    pub fn step(&self) -> bool {
        let mut gate = self.lock();
        if !gate.state.paused {
            return false;
        }
        gate.state.step_requested = true;
        self.wake.notify_one();
        true
    }

    /// Clear the flags at the end of a session
    pub fn reset(&self) {
        let mut gate = self.lock();
        gate.state = PauseState::default();
        self.wake.notify_all();
    }

    pub fn state(&self) -> PauseState {
        self.lock().state
    }

    pub fn is_paused(&self) -> bool {
        self.lock().state.paused
    }

    /// Wake the worker for good; every later wait returns [`Turn::Halt`]
    pub(crate) fn halt(&self) {
        let mut gate = self.lock();
        gate.halted = true;
        self.wake.notify_all();
    }

    /// Block until the worker may process its next record
    pub(crate) fn wait_turn(&self) -> Turn {
        let mut gate = self.lock();
        loop {
            if gate.halted {
                return Turn::Halt;
            }
            if !gate.state.paused {
                return Turn::Proceed { stepped: false };
            }
            if gate.state.step_requested {
                gate.state.step_requested = false;
                return Turn::Proceed { stepped: true };
            }
            gate = self
                .wake
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Give back a step that did not yield an event
    pub(crate) fn restore_step(&self) {
        let mut gate = self.lock();
        if gate.state.paused {
            gate.state.step_requested = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_unpaused_proceeds_immediately() {
        let pause = PauseController::new(false);
        assert_eq!(pause.wait_turn(), Turn::Proceed { stepped: false });
    }

    #[test]
    fn test_pause_and_resume_flags() {
        let pause = PauseController::new(false);
        assert!(pause.pause());
        assert!(!pause.pause());
        assert!(pause.is_paused());
        assert!(pause.resume());
        assert!(!pause.resume());
        assert_eq!(pause.state(), PauseState::default());
    }

    #[test]
    fn test_step_ignored_when_running() {
        let pause = PauseController::new(false);
        assert!(!pause.step());
        assert!(!pause.state().step_requested);
    }

    #[test]
    fn test_step_grants_exactly_one_turn() {
        let pause = PauseController::new(true);
        assert!(pause.step());
        assert_eq!(pause.wait_turn(), Turn::Proceed { stepped: true });
        assert_eq!(
            pause.state(),
            PauseState {
                paused: true,
                step_requested: false
            }
        );
    }

    #[test]
    fn test_step_sent_before_wait_is_not_lost() {
        let pause = Arc::new(PauseController::new(true));
        pause.step();

        let worker = Arc::clone(&pause);
        let handle = thread::spawn(move || worker.wait_turn());
        assert_eq!(handle.join().unwrap(), Turn::Proceed { stepped: true });
    }

    #[test]
    fn test_resume_wakes_waiter() {
        let pause = Arc::new(PauseController::new(true));
        let (tx, rx) = mpsc::channel();

        let worker = Arc::clone(&pause);
        thread::spawn(move || tx.send(worker.wait_turn()).unwrap());

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        pause.resume();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Turn::Proceed { stepped: false }
        );
    }

    #[test]
    fn test_halt_wakes_paused_waiter() {
        let pause = Arc::new(PauseController::new(true));
        let worker = Arc::clone(&pause);
        let handle = thread::spawn(move || worker.wait_turn());

        thread::sleep(Duration::from_millis(20));
        pause.halt();
        assert_eq!(handle.join().unwrap(), Turn::Halt);
    }

    #[test]
    fn test_restore_step_only_while_paused() {
        let pause = PauseController::new(true);
        pause.restore_step();
        assert!(pause.state().step_requested);

        pause.resume();
        pause.restore_step();
        assert!(!pause.state().step_requested);
    }
}
