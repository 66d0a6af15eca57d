//! Capture -> preprocess -> detect -> publish, driven on a fixed schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::detect::{extract, DetectionRecord, DetectorBackend};
use crate::error::PipelineError;
use crate::ingest::FrameSource;
use crate::labels::LabelTable;
use crate::preprocess::{prepare_tensor, ModelInput};
use crate::publisher::Publisher;
use crate::transport::MessageChannel;

const STOP_POLL: Duration = Duration::from_millis(100);

/// "Publish every `interval`, `count` times", then wait `settle` so
/// in-flight messages reach the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishSchedule {
    /// Number of cycles; `None` runs until stopped.
    pub count: Option<u32>,
    pub interval: Duration,
    pub settle: Duration,
}

impl Default for PublishSchedule {
    fn default() -> Self {
        Self {
            count: Some(2),
            interval: Duration::from_secs(5),
            settle: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CycleOutcome {
    /// Capture produced no frame; nothing downstream ran.
    NoFrame,
    Published(DetectionRecord),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub cycles: u32,
    pub published: u32,
    pub no_frame: u32,
    pub failed: u32,
    /// Failures that a later attempt could clear (channel errors).
    pub retryable: u32,
    pub stopped_early: bool,
}

pub struct DetectionPipeline<'a, C: MessageChannel + ?Sized> {
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    labels: LabelTable,
    input: ModelInput,
    publisher: Publisher<'a, C>,
}

impl<'a, C: MessageChannel + ?Sized> DetectionPipeline<'a, C> {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        labels: LabelTable,
        input: ModelInput,
        publisher: Publisher<'a, C>,
    ) -> Self {
        Self {
            source,
            detector,
            labels,
            input,
            publisher,
        }
    }

    /// One capture/detect/publish pass.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        let Some(frame) = self.source.capture_frame() else {
            log::warn!(
                "{}: no frame captured; skipping detection this cycle",
                self.source.name()
            );
            return Ok(CycleOutcome::NoFrame);
        };
        let tensor = prepare_tensor(&frame, self.input)?;
        let output = self.detector.infer(&tensor)?;
        let record = extract(&output, &self.labels)?;
        log::info!(
            "Detected {} (class {}, confidence {:.3})",
            record.label,
            record.class_id,
            record.confidence
        );
        self.publisher.publish(&record)?;
        Ok(CycleOutcome::Published(record))
    }

    /// Run cycles per `schedule` until done or `stop` is set.
    ///
    /// Each cycle's failure is logged and counted; the schedule continues.
    pub fn run_schedule(&mut self, schedule: &PublishSchedule, stop: &AtomicBool) -> ScheduleReport {
        let mut report = ScheduleReport::default();
        loop {
            if stop.load(Ordering::SeqCst) {
                report.stopped_early = true;
                break;
            }
            report.cycles += 1;
            match self.run_cycle() {
                Ok(CycleOutcome::Published(_)) => report.published += 1,
                Ok(CycleOutcome::NoFrame) => report.no_frame += 1,
                Err(e) => {
                    report.failed += 1;
                    if e.is_retryable() {
                        report.retryable += 1;
                        log::warn!("cycle {} failed (retry-eligible): {}", report.cycles, e);
                    } else {
                        log::error!("cycle {} failed: {}", report.cycles, e);
                    }
                }
            }
            if schedule.count.is_some_and(|count| report.cycles >= count) {
                break;
            }
            if !wait(schedule.interval, stop) {
                report.stopped_early = true;
                break;
            }
        }

        if !report.stopped_early {
            wait(schedule.settle, stop);
        }
        log::info!(
            "schedule finished: {} cycle(s), {} published, {} without frame, {} failed",
            report.cycles,
            report.published,
            report.no_frame,
            report.failed
        );
        report
    }
}

/// Sleep for `duration` in short slices. Returns false if `stop` was set.
fn wait(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(STOP_POLL.min(deadline - now));
    }
}
