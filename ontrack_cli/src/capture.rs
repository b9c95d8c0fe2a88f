// THEORY:
// Everything that touches OpenCV lives here, behind the `opencv` feature. The
// library never sees an OpenCV type: frames are converted to `RgbImage` on the
// way in and back to BGR `Mat`s on the way out, so the tracker core builds and
// tests without a native OpenCV installation.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbImage;
use opencv::{
    core::{self, Mat, Scalar},
    highgui, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};

use ontrack::core_modules::annotation::Annotator;
use ontrack::{Frame, FrameSource, TrackingError, VideoSink};

const FALLBACK_FPS: f64 = 30.0;
const PREVIEW_WINDOW: &str = "ontrack";
const QUIT_KEY: i32 = 'q' as i32;

/// A camera or a video file read through OpenCV.
pub struct OpenCvSource {
    capture: VideoCapture,
    buffer: Mat,
    frame_rate: f64,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl OpenCvSource {
    pub fn camera(index: i32, fps_override: Option<f64>) -> Result<Self, TrackingError> {
        let capture = VideoCapture::new(index, videoio::CAP_ANY).map_err(unavailable)?;
        Self::from_capture(capture, &format!("camera {index}"), fps_override)
    }

    pub fn file(path: &Path, fps_override: Option<f64>) -> Result<Self, TrackingError> {
        let name = path.to_string_lossy();
        let capture = VideoCapture::from_file(&name, videoio::CAP_ANY).map_err(unavailable)?;
        Self::from_capture(capture, &name, fps_override)
    }

    fn from_capture(
        capture: VideoCapture,
        name: &str,
        fps_override: Option<f64>,
    ) -> Result<Self, TrackingError> {
        if !capture.is_opened().map_err(unavailable)? {
            return Err(TrackingError::SourceUnavailable(format!("cannot open {name}")));
        }
        let width = capture.get(videoio::CAP_PROP_FRAME_WIDTH).map_err(unavailable)? as u32;
        let height = capture.get(videoio::CAP_PROP_FRAME_HEIGHT).map_err(unavailable)? as u32;
        let reported = capture.get(videoio::CAP_PROP_FPS).map_err(unavailable)?;
        let frame_rate = match fps_override {
            Some(fps) => fps,
            None if reported.is_finite() && reported > 0.0 => reported,
            None => {
                log::warn!("{name} reports {reported} fps, assuming {FALLBACK_FPS}");
                FALLBACK_FPS
            }
        };
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(TrackingError::Config(format!(
                "frame rate must be a positive number, got {frame_rate}"
            )));
        }
        log::info!("opened {name}: {width}x{height} @ {frame_rate} fps");
        Ok(Self {
            capture,
            buffer: Mat::default(),
            frame_rate,
            width,
            height,
            frames_read: 0,
        })
    }
}

impl FrameSource for OpenCvSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, TrackingError> {
        let index = self.frames_read + 1;
        let decode = |e: opencv::Error| TrackingError::Decode {
            index,
            reason: e.to_string(),
        };
        if !self.capture.read(&mut self.buffer).map_err(decode)? || self.buffer.empty() {
            return Ok(None);
        }
        self.frames_read = index;

        let image = mat_to_rgb(&self.buffer).map_err(decode)?;
        if image.dimensions() != (self.width, self.height) {
            return Err(TrackingError::ResolutionMismatch {
                index,
                width: self.width,
                height: self.height,
                actual_width: image.width(),
                actual_height: image.height(),
            });
        }
        Ok(Some(Frame::new(index, self.frame_rate, image)))
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Annotated video encoded as MPEG-4 Part 2 (`mp4v`).
pub struct Mp4Sink {
    writer: VideoWriter,
}

impl Mp4Sink {
    pub fn create(path: &Path, frame_rate: f64, resolution: (u32, u32)) -> Result<Self, TrackingError> {
        let open_failed = |reason: String| TrackingError::SinkOpen {
            path: path.to_path_buf(),
            source: std::io::Error::other(reason),
        };
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v').map_err(|e| open_failed(e.to_string()))?;
        let size = core::Size::new(resolution.0 as i32, resolution.1 as i32);
        let writer = VideoWriter::new(&path.to_string_lossy(), fourcc, frame_rate, size, true)
            .map_err(|e| open_failed(e.to_string()))?;
        if !writer.is_opened().map_err(|e| open_failed(e.to_string()))? {
            return Err(open_failed("encoder refused the output".into()));
        }
        log::info!("annotated video: {}", path.display());
        Ok(Self { writer })
    }
}

impl VideoSink for Mp4Sink {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), TrackingError> {
        let frame = rgb_to_mat(image).map_err(sink_error)?;
        self.writer.write(&frame).map_err(sink_error)
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        self.writer.release().map_err(sink_error)
    }
}

/// On-screen preview with axis guides. Pressing `q` raises the cancel flag.
pub struct PreviewWindow {
    annotator: Annotator,
    cancel: Arc<AtomicBool>,
}

impl PreviewWindow {
    pub fn open(annotator: Annotator, cancel: Arc<AtomicBool>) -> Result<Self, TrackingError> {
        highgui::named_window(PREVIEW_WINDOW, highgui::WINDOW_AUTOSIZE).map_err(|e| {
            TrackingError::SinkOpen {
                path: PREVIEW_WINDOW.into(),
                source: std::io::Error::other(e.to_string()),
            }
        })?;
        Ok(Self { annotator, cancel })
    }

    /// Shows one frame and reports whether `q` was pressed.
    fn show(&self, image: &RgbImage) -> Result<bool, TrackingError> {
        let mut canvas = image.clone();
        self.annotator.draw_axis_guides(&mut canvas);
        let frame = rgb_to_mat(&canvas).map_err(sink_error)?;
        highgui::imshow(PREVIEW_WINDOW, &frame).map_err(sink_error)?;
        let key = highgui::wait_key(1).map_err(sink_error)?;
        Ok(key & 0xFF == QUIT_KEY)
    }
}

impl VideoSink for PreviewWindow {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), TrackingError> {
        if self.show(image)? {
            log::info!("stop requested from the preview window");
            self.cancel.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), TrackingError> {
        highgui::destroy_window(PREVIEW_WINDOW).map_err(sink_error)
    }
}

/// Shows a camera feed with axis guides until `q` or Ctrl-C, without tracking.
pub fn cam_test(index: i32, annotator: Annotator, cancel: Arc<AtomicBool>) -> Result<u64, TrackingError> {
    let mut source = OpenCvSource::camera(index, None)?;
    let mut preview = PreviewWindow::open(annotator, cancel.clone())?;
    let mut shown = 0;
    let result = loop {
        if cancel.load(Ordering::SeqCst) {
            break Ok(shown);
        }
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(shown),
            Err(e) => break Err(e),
        };
        if let Err(e) = preview.write_frame(frame.image()) {
            break Err(e);
        }
        shown += 1;
    };
    preview.finish()?;
    result
}

fn mat_to_rgb(frame: &Mat) -> opencv::Result<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
    let bytes = rgb.data_bytes()?.to_vec();
    RgbImage::from_raw(width, height, bytes).ok_or_else(|| {
        opencv::Error::new(core::StsUnmatchedSizes, "frame buffer does not match its size")
    })
}

fn rgb_to_mat(image: &RgbImage) -> opencv::Result<Mat> {
    let size = core::Size::new(image.width() as i32, image.height() as i32);
    let mut rgb = Mat::new_size_with_default(size, core::CV_8UC3, Scalar::all(0.0))?;
    rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());
    let mut bgr = Mat::default();
    imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

fn unavailable(e: opencv::Error) -> TrackingError {
    TrackingError::SourceUnavailable(e.to_string())
}

fn sink_error(e: opencv::Error) -> TrackingError {
    TrackingError::Sink(e.to_string())
}
