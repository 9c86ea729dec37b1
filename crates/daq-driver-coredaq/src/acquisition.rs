//! Acquisition state machine.
//!
//! ```text
//!          arm             start
//!   IDLE ───────► ARMED ─────────► RUNNING ──┐
//!    ▲  │ trig_arm                            │ poll
//!    │  └───────► TRIGGER_WAIT ───────────────┤
//!    │                                        ▼
//!    └──────── last frame transferred ── DATA_READY
//!
//!   any state ── protocol fault ──► ERROR ── stop ──► IDLE
//! ```
//!
//! [`AcquisitionMachine`] only does bookkeeping and validation. The driver
//! checks a transition with it, talks to the device, then records the outcome,
//! so a refused command never leaves the machine half-way.

use crate::protocol::TriggerEdge;
use daq_core::error::{AppResult, DaqError};
use std::fmt;
use std::time::Duration;

/// Device acquisition state as reported by `STATE?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AcquisitionState {
    /// No acquisition in progress.
    #[default]
    Idle,
    /// Frame count latched, waiting for `start`.
    Armed,
    /// Waiting for an external trigger edge.
    TriggerWait,
    /// Sampling into device memory.
    Running,
    /// Capture complete, frames available for transfer.
    DataReady,
    /// The device reported an unknown state or the link faulted.
    Error,
}

impl AcquisitionState {
    /// Map a firmware status code. Unknown codes map to [`AcquisitionState::Error`].
    pub fn from_status_code(code: i64) -> Self {
        match code {
            0 => AcquisitionState::Idle,
            1 => AcquisitionState::Armed,
            2 => AcquisitionState::TriggerWait,
            3 => AcquisitionState::Running,
            4 => AcquisitionState::DataReady,
            _ => AcquisitionState::Error,
        }
    }

    /// Firmware status code, `None` for [`AcquisitionState::Error`].
    pub fn status_code(self) -> Option<i64> {
        match self {
            AcquisitionState::Idle => Some(0),
            AcquisitionState::Armed => Some(1),
            AcquisitionState::TriggerWait => Some(2),
            AcquisitionState::Running => Some(3),
            AcquisitionState::DataReady => Some(4),
            AcquisitionState::Error => None,
        }
    }

    /// `DataReady` or `Error`: polling stops here.
    pub fn is_terminal(self) -> bool {
        matches!(self, AcquisitionState::DataReady | AcquisitionState::Error)
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AcquisitionState::Idle => "IDLE",
            AcquisitionState::Armed => "ARMED",
            AcquisitionState::TriggerWait => "TRIGGER_WAIT",
            AcquisitionState::Running => "RUNNING",
            AcquisitionState::DataReady => "DATA_READY",
            AcquisitionState::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// How sampling of a session begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Host-issued `start`.
    Software,
    /// External rising edge.
    Rising,
    /// External falling edge.
    Falling,
}

impl From<TriggerEdge> for TriggerMode {
    fn from(edge: TriggerEdge) -> Self {
        match edge {
            TriggerEdge::Rising => TriggerMode::Rising,
            TriggerEdge::Falling => TriggerMode::Falling,
        }
    }
}

/// Bookkeeping for one armed acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionSession {
    requested_frames: u32,
    frames_transferred: u32,
    trigger: TriggerMode,
}

impl AcquisitionSession {
    fn new(requested_frames: u32, trigger: TriggerMode) -> Self {
        Self {
            requested_frames,
            frames_transferred: 0,
            trigger,
        }
    }

    /// Frames requested at arm time.
    pub fn requested_frames(&self) -> u32 {
        self.requested_frames
    }

    /// Frames already handed to the caller.
    pub fn frames_transferred(&self) -> u32 {
        self.frames_transferred
    }

    /// Frames still waiting in device memory.
    pub fn frames_left(&self) -> u32 {
        self.requested_frames - self.frames_transferred
    }

    /// How the session was started.
    pub fn trigger(&self) -> TriggerMode {
        self.trigger
    }
}

/// Host-side model of the device acquisition state.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionMachine {
    state: AcquisitionState,
    session: Option<AcquisitionSession>,
    completed: Option<AcquisitionSession>,
}

impl AcquisitionMachine {
    /// Fresh machine in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Active session, if any.
    pub fn session(&self) -> Option<&AcquisitionSession> {
        self.session.as_ref()
    }

    /// Frames left in the active session.
    ///
    /// After the last frame is transferred this stays at 0 until the next
    /// arm or stop.
    ///
    /// # Errors
    ///
    /// [`DaqError::InvalidState`] when nothing has been armed.
    pub fn frames_left(&self) -> AppResult<u32> {
        self.session
            .as_ref()
            .or(self.completed.as_ref())
            .map(AcquisitionSession::frames_left)
            .ok_or_else(|| DaqError::invalid_state("query frames left", "no acquisition is armed"))
    }

    fn require(&self, operation: &str, allowed: &[AcquisitionState]) -> AppResult<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(DaqError::invalid_state(operation, state))
        }
    }

    /// Check that `arm`/`trig_arm` may be issued.
    pub fn check_arm(&self, operation: &str, frames: u32) -> AppResult<()> {
        self.require(operation, &[AcquisitionState::Idle])?;
        if frames == 0 {
            return Err(DaqError::InvalidArgument("frames must be > 0".into()));
        }
        Ok(())
    }

    /// Record a successful arm.
    pub fn armed(&mut self, frames: u32, trigger: TriggerMode) {
        self.session = Some(AcquisitionSession::new(frames, trigger));
        self.completed = None;
        self.state = match trigger {
            TriggerMode::Software => AcquisitionState::Armed,
            TriggerMode::Rising | TriggerMode::Falling => AcquisitionState::TriggerWait,
        };
    }

    /// Check that `start` may be issued.
    pub fn check_start(&self) -> AppResult<()> {
        self.require("start", &[AcquisitionState::Armed])
    }

    /// Record a successful start.
    pub fn started(&mut self) {
        self.state = AcquisitionState::Running;
    }

    /// Check that polling makes sense: a session must exist.
    pub fn check_poll(&self) -> AppResult<()> {
        match self.session {
            Some(_) => self.require(
                "wait for completion",
                &[
                    AcquisitionState::Armed,
                    AcquisitionState::TriggerWait,
                    AcquisitionState::Running,
                    AcquisitionState::DataReady,
                ],
            ),
            None => Err(DaqError::invalid_state(
                "wait for completion",
                "no acquisition is armed",
            )),
        }
    }

    /// Adopt a state reported by the device while a session is active.
    pub fn polled(&mut self, reported: AcquisitionState) {
        if self.session.is_some() {
            self.state = reported;
        }
    }

    /// Check that `frames` may be transferred now.
    pub fn check_transfer(&self, frames: u32) -> AppResult<()> {
        self.require("transfer frames", &[AcquisitionState::DataReady])?;
        let left = self.frames_left()?;
        if frames == 0 || frames > left {
            return Err(DaqError::InvalidArgument(format!(
                "frames must be 1..={left}, got {frames}"
            )));
        }
        Ok(())
    }

    /// Record a completed transfer. The session ends once every frame is out.
    pub fn transferred(&mut self, frames: u32) {
        if let Some(session) = self.session.as_mut() {
            session.frames_transferred =
                (session.frames_transferred + frames).min(session.requested_frames);
            if session.frames_left() == 0 {
                self.state = AcquisitionState::Idle;
                self.completed = self.session.take();
            }
        }
    }

    /// A protocol fault happened during an acquisition operation.
    pub fn fault(&mut self) {
        self.state = AcquisitionState::Error;
    }

    /// Discard the session and return to `Idle`.
    pub fn reset(&mut self) {
        self.state = AcquisitionState::Idle;
        self.session = None;
        self.completed = None;
    }

    /// Whether no session is active and the device may be used for snapshots.
    pub fn is_idle(&self) -> bool {
        self.state() == AcquisitionState::Idle && self.session.is_none()
    }
}

// =============================================================================
// Polling pace
// =============================================================================

/// Waits between polls.
///
/// The driver never sleeps directly, so tests can substitute a fake clock.
pub trait Pacer: Send {
    /// Block for `interval` (or pretend to).
    fn pause(&mut self, interval: Duration);
}

/// [`Pacer`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&mut self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daq_core::ErrorKind;

    #[test]
    fn status_codes_map_to_states() {
        for code in 0..=4 {
            let state = AcquisitionState::from_status_code(code);
            assert_eq!(state.status_code(), Some(code));
        }
        assert_eq!(AcquisitionState::from_status_code(9), AcquisitionState::Error);
        assert_eq!(AcquisitionState::from_status_code(-1), AcquisitionState::Error);
    }

    #[test]
    fn start_requires_arm() {
        let machine = AcquisitionMachine::new();
        let err = machine.check_start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.to_string(), "Cannot start while IDLE");
    }

    #[test]
    fn arm_only_from_idle() {
        let mut machine = AcquisitionMachine::new();
        machine.check_arm("arm", 10).unwrap();
        machine.armed(10, TriggerMode::Software);
        assert_eq!(machine.state(), AcquisitionState::Armed);
        assert_eq!(
            machine.check_arm("arm", 10).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            AcquisitionMachine::new().check_arm("arm", 0).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn trigger_arm_waits_for_edge() {
        let mut machine = AcquisitionMachine::new();
        machine.armed(4, TriggerMode::from(TriggerEdge::Falling));
        assert_eq!(machine.state(), AcquisitionState::TriggerWait);
        assert_eq!(machine.session().unwrap().trigger(), TriggerMode::Falling);
        assert!(machine.check_start().is_err());
    }

    #[test]
    fn partial_transfers_count_down_then_reset() {
        let mut machine = AcquisitionMachine::new();
        assert!(machine.frames_left().is_err());
        machine.armed(10, TriggerMode::Software);
        machine.started();
        assert!(machine.check_transfer(1).is_err());
        machine.polled(AcquisitionState::DataReady);

        let mut seen = vec![machine.frames_left().unwrap()];
        for chunk in [4, 4] {
            machine.check_transfer(chunk).unwrap();
            machine.transferred(chunk);
            seen.push(machine.frames_left().unwrap());
        }
        assert_eq!(seen, vec![10, 6, 2]);
        assert_eq!(
            machine.check_transfer(3).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        machine.transferred(2);
        assert!(machine.is_idle());
        assert_eq!(machine.frames_left().unwrap(), 0);
        assert_eq!(
            machine.check_transfer(1).unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        machine.armed(5, TriggerMode::Software);
        assert_eq!(machine.frames_left().unwrap(), 5);
        machine.reset();
        assert!(machine.frames_left().is_err());
    }

    #[test]
    fn fault_then_reset() {
        let mut machine = AcquisitionMachine::new();
        machine.armed(3, TriggerMode::Software);
        machine.fault();
        assert_eq!(machine.state(), AcquisitionState::Error);
        assert!(machine.check_start().is_err());
        machine.reset();
        assert!(machine.is_idle());
    }

    #[test]
    fn poll_requires_session() {
        let machine = AcquisitionMachine::new();
        assert_eq!(machine.check_poll().unwrap_err().kind(), ErrorKind::InvalidState);
    }
}
