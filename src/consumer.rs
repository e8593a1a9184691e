//! Frame consumer
//!
//! Runs on its own thread, fed by the frame source through a bounded
//! channel. Every frame passes through the acquisition gate; only admitted
//! ones reach the persistence sink.

use std::io;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::frame::{Frame, FrameRecord};
use crate::gate::AcquisitionGate;
use crate::sink::PersistenceSink;
use crate::status::DaemonStatus;

pub struct FrameConsumer {
    gate: Arc<AcquisitionGate>,
    sink: Box<dyn PersistenceSink>,
    status: Arc<DaemonStatus>,
}

impl FrameConsumer {
    pub fn new(
        gate: Arc<AcquisitionGate>,
        sink: Box<dyn PersistenceSink>,
        status: Arc<DaemonStatus>,
    ) -> Self {
        Self { gate, sink, status }
    }

    /// Handle one delivered frame. Returns the record when the gate admitted
    /// it, whether or not saving succeeded.
    pub fn handle(&mut self, frame: Frame) -> Option<FrameRecord> {
        let record = self.gate.try_admit()?;
        match self.sink.persist(&frame, &record) {
            Ok(path) => {
                debug!("Saved frame {} to {}", record.sequence, path.display());
                self.status.frame_saved();
            }
            Err(e) => error!("Failed to save frame {}: {:#}", record.sequence, e),
        }
        Some(record)
    }

    /// Drain `frames` on a dedicated thread until every sender is gone.
    pub fn spawn(mut self, frames: Receiver<Frame>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("frame-consumer".into())
            .spawn(move || {
                for frame in frames {
                    self.handle(frame);
                }
                info!("Frame channel closed, consumer stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_frame, MemorySink};
    use std::sync::mpsc::sync_channel;

    fn consumer(gate: &Arc<AcquisitionGate>, sink: &MemorySink) -> FrameConsumer {
        FrameConsumer::new(
            gate.clone(),
            Box::new(sink.clone()),
            Arc::new(DaemonStatus::new()),
        )
    }

    #[test]
    fn closed_gate_discards_frames() {
        let gate = Arc::new(AcquisitionGate::new());
        let sink = MemorySink::default();
        let mut consumer = consumer(&gate, &sink);

        gate.begin_burst("x", 3);
        assert!(consumer.handle(test_frame()).is_none());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn burst_yields_sequential_records() {
        let gate = Arc::new(AcquisitionGate::new());
        let sink = MemorySink::default();
        let status = Arc::new(DaemonStatus::new());
        let mut consumer = FrameConsumer::new(gate.clone(), Box::new(sink.clone()), status.clone());

        gate.begin_burst("seq", 4);
        while gate.arm() {
            consumer.handle(test_frame());
            // jitter: extra frames before the next pulse
            consumer.handle(test_frame());
        }

        let sequences: Vec<u64> = sink.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert!(sink.records().iter().all(|r| r.prefix == "seq"));
        assert_eq!(status.frames_saved(), 4);
    }

    #[test]
    fn sink_failure_still_counts_admission() {
        let gate = Arc::new(AcquisitionGate::new());
        let sink = MemorySink::failing();
        let status = Arc::new(DaemonStatus::new());
        let mut consumer = FrameConsumer::new(gate.clone(), Box::new(sink), status.clone());

        gate.begin_burst("bad", 1);
        gate.arm();
        assert!(consumer.handle(test_frame()).is_some());
        assert_eq!(gate.accepted(), 1);
        assert_eq!(status.frames_saved(), 0);
    }

    #[test]
    fn worker_thread_admits_one_frame_per_arm() {
        let gate = Arc::new(AcquisitionGate::new());
        let sink = MemorySink::default();
        let (tx, rx) = sync_channel(8);
        let handle = consumer(&gate, &sink).spawn(rx).unwrap();

        gate.begin_burst("threaded", 10);
        gate.arm();
        for _ in 0..5 {
            tx.send(test_frame()).unwrap();
        }
        drop(tx);
        handle.join().unwrap();

        assert_eq!(sink.records().len(), 1);
        assert_eq!(gate.accepted(), 1);
    }
}
