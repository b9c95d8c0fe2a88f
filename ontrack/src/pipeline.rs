// THEORY:
// The `pipeline` module is the top-level API of the tracker. A `TrackingSession`
// owns one instance of every stage and pushes each frame through all of them
// before the next frame is acquired:
//
//   Frame -> BackgroundModel -> BlobExtractor -> Calibrator -> Trajectory + Video
//
// Per-frame outcomes that are not failures (no blob, a square box) are reported as
// `FrameOutcome::Skipped` and merely counted. Only I/O on the source or the sinks
// can abort a session, and even then the trajectory is flushed and every video
// sink is closed before the error is returned.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::TrackerConfig;
use crate::core_modules::annotation::{Annotation, Annotator};
use crate::core_modules::background_model::{BackgroundModel, KnnBackgroundModel};
use crate::core_modules::blob_extractor::BlobExtractor;
use crate::core_modules::calibrator::{Calibrator, ObjectDimensions};
use crate::core_modules::frame::{Frame, FrameSource};
use crate::core_modules::trajectory::{TrajectoryRecorder, TrajectorySample};
use crate::core_modules::video_sink::VideoSink;
use crate::error::TrackingError;

/// Why a frame produced no sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing survived denoising.
    NoBlob,
    /// The bounding box was square, so no scale could be derived.
    SquareBlob,
}

/// The result of pushing one frame through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Tracked(Annotation),
    Skipped(SkipReason),
}

impl FrameOutcome {
    pub fn sample(&self) -> Option<&TrajectorySample> {
        self.annotation().map(|annotation| &annotation.sample)
    }

    pub fn annotation(&self) -> Option<&Annotation> {
        match self {
            FrameOutcome::Tracked(annotation) => Some(annotation),
            FrameOutcome::Skipped(_) => None,
        }
    }
}

/// How the frame loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionEnd {
    /// The source ran out of frames.
    #[default]
    Exhausted,
    /// The cancel flag was raised.
    Cancelled,
}

/// Counters of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_read: u64,
    pub samples_written: u64,
    pub skipped_no_blob: u64,
    pub skipped_square: u64,
    pub end: SessionEnd,
}

impl SessionSummary {
    fn count(&mut self, outcome: &FrameOutcome) {
        match outcome {
            FrameOutcome::Tracked(_) => {}
            FrameOutcome::Skipped(SkipReason::NoBlob) => self.skipped_no_blob += 1,
            FrameOutcome::Skipped(SkipReason::SquareBlob) => self.skipped_square += 1,
        }
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = match self.end {
            SessionEnd::Exhausted => "source exhausted",
            SessionEnd::Cancelled => "cancelled",
        };
        write!(
            f,
            "{} frames read, {} samples written, {} without blob, {} square ({})",
            self.frames_read, self.samples_written, self.skipped_no_blob, self.skipped_square, end
        )
    }
}

/// One tracking session: a background model, a blob extractor and a calibrator
/// bound to a single object size.
pub struct TrackingSession {
    background: Box<dyn BackgroundModel>,
    extractor: BlobExtractor,
    calibrator: Calibrator,
    annotator: Annotator,
}

impl TrackingSession {
    pub fn new(
        background: Box<dyn BackgroundModel>,
        extractor: BlobExtractor,
        calibrator: Calibrator,
        annotator: Annotator,
    ) -> Self {
        Self {
            background,
            extractor,
            calibrator,
            annotator,
        }
    }

    /// Builds the default stack (KNN model, morphological denoiser) for a
    /// source of the given resolution.
    pub fn from_config(
        config: &TrackerConfig,
        resolution: (u32, u32),
        dimensions: ObjectDimensions,
    ) -> Result<Self, TrackingError> {
        config.validate()?;
        let calibrator = Calibrator::new(dimensions)?;
        let annotator = Annotator::from_config(&config.output)?;
        let (width, height) = resolution;
        let background = KnnBackgroundModel::new(width, height, config.knn.clone())?;
        Ok(Self::new(
            Box::new(background),
            BlobExtractor::with_config(config.denoise.clone()),
            calibrator,
            annotator,
        ))
    }

    /// Classifies, denoises, extracts and calibrates a single frame.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameOutcome {
        // Stage 1: Temporal Analysis
        let mask = self.background.observe(frame);

        // Stage 2: Spatial Grouping
        let Some(blob) = self.extractor.extract(mask) else {
            log::debug!("frame {}: no blob", frame.index());
            return FrameOutcome::Skipped(SkipReason::NoBlob);
        };

        // Stage 3: Calibration
        let Some(position) = self.calibrator.calibrate(&blob) else {
            log::debug!(
                "frame {}: square box {}x{}, scale undefined",
                frame.index(),
                blob.width,
                blob.height
            );
            return FrameOutcome::Skipped(SkipReason::SquareBlob);
        };

        FrameOutcome::Tracked(Annotation {
            blob,
            centroid: position.centroid,
            sample: TrajectorySample::quantized(frame.timestamp(), position.x, position.y),
        })
    }

    /// Runs the frame loop until the source is exhausted or `cancel` is set.
    ///
    /// The recorder is flushed and every sink finished on every exit path.
    pub fn run<S, W>(
        &mut self,
        source: &mut S,
        recorder: &mut TrajectoryRecorder<W>,
        sinks: &mut [Box<dyn VideoSink>],
        cancel: &AtomicBool,
    ) -> Result<SessionSummary, TrackingError>
    where
        S: FrameSource + ?Sized,
        W: Write,
    {
        let (width, height) = source.resolution();
        log::info!(
            "session started: {}x{} @ {} fps, object {:?}",
            width,
            height,
            source.frame_rate(),
            self.calibrator.dimensions()
        );

        let mut summary = SessionSummary::default();
        let looped = self.drive(source, recorder, sinks, cancel, &mut summary);

        let flushed = recorder.flush();
        let mut finished: Result<(), TrackingError> = Ok(());
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.finish() {
                log::error!("closing video sink failed: {e}");
                if finished.is_ok() {
                    finished = Err(e);
                }
            }
        }
        summary.samples_written = recorder.samples_written();

        if let Err(e) = &looped {
            log::error!("session aborted after {} frames: {e}", summary.frames_read);
        }
        looped?;
        flushed?;
        finished?;

        log::info!("session finished: {summary}");
        Ok(summary)
    }

    fn drive<S, W>(
        &mut self,
        source: &mut S,
        recorder: &mut TrajectoryRecorder<W>,
        sinks: &mut [Box<dyn VideoSink>],
        cancel: &AtomicBool,
        summary: &mut SessionSummary,
    ) -> Result<(), TrackingError>
    where
        S: FrameSource + ?Sized,
        W: Write,
    {
        loop {
            if cancel.load(Ordering::SeqCst) {
                summary.end = SessionEnd::Cancelled;
                return Ok(());
            }
            let Some(frame) = source.next_frame()? else {
                summary.end = SessionEnd::Exhausted;
                return Ok(());
            };
            summary.frames_read += 1;

            let outcome = self.process_frame(&frame);
            summary.count(&outcome);
            if let Some(sample) = outcome.sample() {
                recorder.record(sample)?;
            }

            if !sinks.is_empty() {
                let annotated = self.annotator.annotate(&frame, outcome.annotation());
                for sink in sinks.iter_mut() {
                    sink.write_frame(&annotated)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::background_model::ForegroundMask;
    use crate::core_modules::blob_extractor::DenoiseConfig;
    use crate::core_modules::frame::MemorySource;
    use image::{GrayImage, Luma, RgbImage};

    /// Reports the same fixed rectangle as foreground on every frame.
    struct FixedMask {
        rect: (u32, u32, u32, u32),
    }

    impl BackgroundModel for FixedMask {
        fn observe(&mut self, frame: &Frame) -> ForegroundMask {
            let (x, y, w, h) = self.rect;
            let mut image = GrayImage::new(frame.width(), frame.height());
            for py in y..y + h {
                for px in x..x + w {
                    image.put_pixel(px, py, Luma([ForegroundMask::FOREGROUND]));
                }
            }
            ForegroundMask::from_image(image)
        }
    }

    fn session(rect: (u32, u32, u32, u32)) -> TrackingSession {
        TrackingSession::new(
            Box::new(FixedMask { rect }),
            BlobExtractor::with_config(DenoiseConfig::default()),
            Calibrator::new(ObjectDimensions {
                larger: 4.0,
                smaller: 2.0,
            })
            .unwrap(),
            Annotator::new(None),
        )
    }

    fn frame(index: u64) -> Frame {
        Frame::new(index, 10.0, RgbImage::new(120, 80))
    }

    #[test]
    fn tracked_frame_yields_rounded_sample() {
        let outcome = session((40, 30, 20, 10)).process_frame(&frame(11));
        assert_eq!(outcome.sample(), Some(&TrajectorySample::new(1.1, 10.0, 7.0)));
        assert_eq!(outcome.sample().map(|s| s.to_string()).as_deref(), Some("1.10,10.0,7.0"));
    }

    #[test]
    fn square_box_is_skipped() {
        let outcome = session((40, 30, 12, 12)).process_frame(&frame(1));
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::SquareBlob));
    }

    #[test]
    fn cancelled_session_reads_nothing_and_still_flushes() {
        let mut session = session((40, 30, 20, 10));
        let mut source = MemorySource::new(vec![RgbImage::new(120, 80); 3], 10.0);
        let mut recorder = TrajectoryRecorder::new(Vec::new());
        let cancel = AtomicBool::new(true);

        let summary = session
            .run(&mut source, &mut recorder, &mut [], &cancel)
            .unwrap();
        assert_eq!(summary.end, SessionEnd::Cancelled);
        assert_eq!(summary.frames_read, 0);
        assert!(recorder.into_inner().is_empty());
    }

    #[test]
    fn summary_counts_every_frame() {
        let mut session = session((40, 30, 20, 10));
        let mut source = MemorySource::new(vec![RgbImage::new(120, 80); 4], 10.0);
        let mut recorder = TrajectoryRecorder::new(Vec::new());

        let summary = session
            .run(&mut source, &mut recorder, &mut [], &AtomicBool::new(false))
            .unwrap();
        assert_eq!(
            summary,
            SessionSummary {
                frames_read: 4,
                samples_written: 4,
                skipped_no_blob: 0,
                skipped_square: 0,
                end: SessionEnd::Exhausted,
            }
        );
        let text = String::from_utf8(recorder.into_inner()).unwrap();
        assert_eq!(text.lines().next(), Some("0.10,10.0,7.0"));
    }

    struct FailingSink;

    impl VideoSink for FailingSink {
        fn write_frame(&mut self, _image: &RgbImage) -> Result<(), TrackingError> {
            Err(TrackingError::Sink("disk full".into()))
        }

        fn finish(&mut self) -> Result<(), TrackingError> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_aborts_after_recording_the_frame() {
        let mut session = session((40, 30, 20, 10));
        let mut source = MemorySource::new(vec![RgbImage::new(120, 80); 3], 10.0);
        let mut recorder = TrajectoryRecorder::new(Vec::new());
        let mut sinks: Vec<Box<dyn VideoSink>> = vec![Box::new(FailingSink)];

        let result = session.run(&mut source, &mut recorder, &mut sinks, &AtomicBool::new(false));
        assert!(matches!(result, Err(TrackingError::Sink(_))));
        assert_eq!(recorder.samples_written(), 1);
    }
}
