//! Acquisition gate shared by the trigger controller and the frame consumer
//!
//! The controller arms the gate once per trigger pulse; the consumer tests
//! and clears it for every delivered frame, so each pulse admits at most one
//! frame no matter how many arrive in between.

use chrono::Utc;
use parking_lot::Mutex;

use crate::frame::FrameRecord;

#[derive(Debug, Default)]
struct GateState {
    armed: bool,
    prefix: String,
    accepted: u64,
    target: u64,
}

#[derive(Debug, Default)]
pub struct AcquisitionGate {
    state: Mutex<GateState>,
}

impl AcquisitionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new burst: closed gate, counter back to zero.
    pub fn begin_burst(&self, prefix: &str, target: u64) {
        let mut state = self.state.lock();
        state.armed = false;
        state.accepted = 0;
        state.target = target;
        state.prefix.clear();
        state.prefix.push_str(prefix);
    }

    /// Open the gate for the next frame. Refuses once the burst has all the
    /// frames it asked for.
    pub fn arm(&self) -> bool {
        let mut state = self.state.lock();
        if state.accepted >= state.target {
            return false;
        }
        state.armed = true;
        true
    }

    /// Close the gate; returns whether it was still open.
    pub fn disarm(&self) -> bool {
        std::mem::replace(&mut self.state.lock().armed, false)
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }

    pub fn accepted(&self) -> u64 {
        self.state.lock().accepted
    }

    /// Test-and-clear. On success the frame gets the next sequence number of
    /// the burst and a wall-clock timestamp.
    pub fn try_admit(&self) -> Option<FrameRecord> {
        let mut state = self.state.lock();
        if !std::mem::replace(&mut state.armed, false) {
            return None;
        }
        let sequence = state.accepted;
        state.accepted += 1;
        Some(FrameRecord {
            sequence,
            timestamp_ns: Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            prefix: state.prefix.clone(),
        })
    }
}
