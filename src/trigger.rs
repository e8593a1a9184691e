//! Trigger controller
//!
//! Runs one burst at a time: configure the camera, fire software triggers at
//! a cadence derived from the exposure, stop when enough frames came through
//! the gate or shutdown was requested, then put the camera back into its
//! free-running defaults.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::camera::CameraSettings;
use crate::gate::AcquisitionGate;
use crate::protocol::BurstRequest;
use crate::shutdown::Shutdown;
use crate::status::{BurstState, DaemonStatus};

#[derive(Debug, Clone, Copy)]
pub struct TriggerTiming {
    /// Wait after switching to trigger mode so a running free-run cycle ends.
    pub settle: Duration,
    /// Trigger cadence for exposures up to roughly this long.
    pub base_interval: Duration,
}

impl Default for TriggerTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            base_interval: Duration::from_secs(1),
        }
    }
}

/// Time between two trigger pulses: the base interval, or 1.1 × exposure
/// once 0.9 × exposure exceeds it.
pub fn trigger_interval(exposure_us: u32, base: Duration) -> Duration {
    let exposure_s = f64::from(exposure_us) * 1e-6;
    if exposure_s * 0.9 > base.as_secs_f64() {
        Duration::from_secs_f64(exposure_s * 1.1)
    } else {
        base
    }
}

/// How a burst ended. All of them are reported to the client as `DONE!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstOutcome {
    Completed { frames: u64 },
    TriggerFailed { frames: u64 },
    Aborted { frames: u64 },
}

impl BurstOutcome {
    pub fn frames(&self) -> u64 {
        match *self {
            BurstOutcome::Completed { frames }
            | BurstOutcome::TriggerFailed { frames }
            | BurstOutcome::Aborted { frames } => frames,
        }
    }
}

pub struct TriggerController {
    camera: CameraSettings,
    gate: Arc<AcquisitionGate>,
    status: Arc<DaemonStatus>,
    shutdown: Shutdown,
    timing: TriggerTiming,
}

impl TriggerController {
    pub fn new(
        camera: CameraSettings,
        gate: Arc<AcquisitionGate>,
        status: Arc<DaemonStatus>,
        shutdown: Shutdown,
        timing: TriggerTiming,
    ) -> Self {
        Self {
            camera,
            gate,
            status,
            shutdown,
            timing,
        }
    }

    pub fn camera(&self) -> &CameraSettings {
        &self.camera
    }

    pub async fn run_burst(&self, request: &BurstRequest) -> BurstOutcome {
        info!(
            "Burst '{}': {} frames, exposure {} us, gain {}",
            request.prefix, request.count, request.exposure_us, request.gain
        );
        self.status.burst_started(&request.prefix);

        self.status.set_burst_state(BurstState::Configuring);
        // Auto gain/exposure stay on while triggering.
        self.camera.force_auto();
        self.camera.set_trigger_mode(true);
        let interval = trigger_interval(request.exposure_us, self.timing.base_interval);
        debug!("Trigger interval {:?}", interval);

        let outcome = if self.pause(self.timing.settle).await {
            self.trigger_loop(request, interval).await
        } else {
            BurstOutcome::Aborted { frames: 0 }
        };

        self.status.set_burst_state(BurstState::Draining);
        self.gate.disarm();
        self.camera.restore_defaults();
        self.status.burst_finished();

        match outcome {
            BurstOutcome::Completed { frames } => {
                info!("Burst '{}' complete: {} frames", request.prefix, frames)
            }
            BurstOutcome::TriggerFailed { frames } => warn!(
                "Burst '{}' stopped after trigger failure: {}/{} frames",
                request.prefix, frames, request.count
            ),
            BurstOutcome::Aborted { frames } => warn!(
                "Burst '{}' aborted by shutdown: {}/{} frames",
                request.prefix, frames, request.count
            ),
        }
        outcome
    }

    async fn trigger_loop(&self, request: &BurstRequest, interval: Duration) -> BurstOutcome {
        let target = u64::from(request.count);
        self.gate.begin_burst(&request.prefix, target);
        self.status.set_burst_state(BurstState::Triggering);

        loop {
            let frames = self.gate.accepted();
            if frames >= target {
                return BurstOutcome::Completed { frames };
            }
            if self.shutdown.is_triggered() {
                return BurstOutcome::Aborted { frames };
            }
            // A late frame may have completed the burst since the check.
            if !self.gate.arm() {
                continue;
            }
            if !self.camera.trigger() {
                error!("Could not trigger");
                return BurstOutcome::TriggerFailed {
                    frames: self.gate.accepted(),
                };
            }
            if !self.pause(interval).await {
                return BurstOutcome::Aborted {
                    frames: self.gate.accepted(),
                };
            }
            debug!("Frames acquired: {}", self.gate.accepted());
        }
    }

    /// Sleep for `duration`; `false` if shutdown cut it short.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown.wait() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Property, PropertyValue};
    use crate::consumer::FrameConsumer;
    use crate::mock::{test_frame, MemorySink, MockCamera, MockCameraBuilder};
    use parking_lot::Mutex;
    use tokio::time::Instant;

    struct Rig {
        camera: Arc<MockCamera>,
        sink: MemorySink,
        gate: Arc<AcquisitionGate>,
        status: Arc<DaemonStatus>,
        shutdown: Shutdown,
        controller: TriggerController,
    }

    /// `deliver` decides per trigger number whether the camera produces a frame.
    fn rig(builder: MockCameraBuilder, deliver: impl Fn(u32) -> bool + Send + Sync + 'static) -> Rig {
        let gate = Arc::new(AcquisitionGate::new());
        let sink = MemorySink::default();
        let status = Arc::new(DaemonStatus::new());
        let shutdown = Shutdown::new();
        let consumer = Arc::new(Mutex::new(FrameConsumer::new(
            gate.clone(),
            Box::new(sink.clone()),
            status.clone(),
        )));

        let camera = Arc::new(
            builder
                .on_trigger(move |n| {
                    if deliver(n) {
                        consumer.lock().handle(test_frame());
                    }
                })
                .build(),
        );
        let settings = CameraSettings::new(camera.clone()).unwrap();
        let controller = TriggerController::new(
            settings,
            gate.clone(),
            status.clone(),
            shutdown.clone(),
            TriggerTiming::default(),
        );
        Rig {
            camera,
            sink,
            gate,
            status,
            shutdown,
            controller,
        }
    }

    fn request(count: u32, exposure_us: u32) -> BurstRequest {
        BurstRequest {
            prefix: "t".into(),
            exposure_us,
            count,
            gain: 10,
        }
    }

    fn assert_restored(camera: &MockCamera) {
        assert_eq!(
            camera.last(Property::TriggerMode),
            Some(PropertyValue::Bool(false))
        );
        assert_eq!(camera.last(Property::GainAuto), Some(PropertyValue::Bool(true)));
        assert_eq!(
            camera.last(Property::ExposureAuto),
            Some(PropertyValue::Bool(true))
        );
    }

    #[test]
    fn interval_follows_exposure() {
        let base = Duration::from_secs(1);
        let long = trigger_interval(2_000_000, base);
        assert!((long.as_secs_f64() - 2.2).abs() < 1e-6);
        assert_eq!(trigger_interval(100_000, base), base);
        // 0.9 × 1.1 s is not above 1 s
        assert_eq!(trigger_interval(1_100_000, base), base);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_saves_requested_frames() {
        let rig = rig(MockCameraBuilder::new(), |_| true);

        let outcome = rig.controller.run_burst(&request(3, 100_000)).await;

        assert_eq!(outcome, BurstOutcome::Completed { frames: 3 });
        assert_eq!(rig.camera.triggers(), 3);
        let sequences: Vec<u64> = rig.sink.records().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(!rig.gate.is_armed());
        assert_restored(&rig.camera);
        assert_eq!(rig.status.bursts_completed(), 1);
        assert_eq!(rig.status.burst_state(), BurstState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn configures_auto_and_trigger_mode_first() {
        let rig = rig(MockCameraBuilder::new(), |_| true);
        rig.controller.run_burst(&request(1, 100)).await;

        let writes = rig.camera.writes();
        assert_eq!(
            &writes[..3],
            &[
                (Property::GainAuto, PropertyValue::Bool(true)),
                (Property::ExposureAuto, PropertyValue::Bool(true)),
                (Property::TriggerMode, PropertyValue::Bool(true)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_frames_keep_triggering() {
        // every other pulse is lost
        let rig = rig(MockCameraBuilder::new(), |n| n % 2 == 0);

        let outcome = rig.controller.run_burst(&request(2, 100)).await;

        assert_eq!(outcome, BurstOutcome::Completed { frames: 2 });
        assert_eq!(rig.camera.triggers(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cadence_covers_long_exposures() {
        let rig = rig(MockCameraBuilder::new(), |_| true);
        let start = Instant::now();

        rig.controller.run_burst(&request(2, 2_000_000)).await;

        // settle + 2 × 2.2 s
        assert!(start.elapsed() >= Duration::from_millis(6400));
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_failure_ends_burst_early() {
        let rig = rig(MockCameraBuilder::new().fail_trigger_at(2), |_| true);

        let outcome = rig.controller.run_burst(&request(5, 100)).await;

        assert_eq!(outcome, BurstOutcome::TriggerFailed { frames: 1 });
        assert_eq!(rig.camera.triggers(), 2);
        assert_eq!(rig.sink.records().len(), 1);
        assert_restored(&rig.camera);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_burst_stops_triggering() {
        let shutdown_slot: Arc<Mutex<Option<Shutdown>>> = Arc::new(Mutex::new(None));
        let slot = shutdown_slot.clone();
        let rig = rig(MockCameraBuilder::new(), move |n| {
            if n == 2 {
                if let Some(shutdown) = slot.lock().as_ref() {
                    shutdown.trigger();
                }
            }
            false
        });
        *shutdown_slot.lock() = Some(rig.shutdown.clone());

        let outcome = rig.controller.run_burst(&request(10, 100)).await;

        assert_eq!(outcome, BurstOutcome::Aborted { frames: 0 });
        assert_eq!(rig.camera.triggers(), 2);
        assert!(!rig.gate.is_armed());
        assert_restored(&rig.camera);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_settle_fires_nothing() {
        let rig = rig(MockCameraBuilder::new(), |_| true);
        rig.shutdown.trigger();

        let outcome = rig.controller.run_burst(&request(3, 100)).await;

        assert_eq!(outcome, BurstOutcome::Aborted { frames: 0 });
        assert_eq!(rig.camera.triggers(), 0);
        assert_restored(&rig.camera);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_count_completes_immediately() {
        let rig = rig(MockCameraBuilder::new(), |_| true);
        let outcome = rig.controller.run_burst(&request(0, 100)).await;
        assert_eq!(outcome, BurstOutcome::Completed { frames: 0 });
        assert_eq!(rig.camera.triggers(), 0);
        assert_eq!(outcome.frames(), 0);
    }
}
