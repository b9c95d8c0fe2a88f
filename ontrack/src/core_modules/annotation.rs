// THEORY:
// Annotation is the presentation layer of a session. It turns a frame plus the
// frame's detection (if any) into the picture a person watches: the bounding
// box, a centroid marker, the calibrated coordinates and the elapsed time.
//
// Drawing is done on a copy of the frame, never on the frame itself, so the
// classifier and the saved video never see preview-only decorations such as the
// axis guides.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use crate::config::OutputConfig;
use crate::core_modules::blob_extractor::{Blob, Point};
use crate::core_modules::frame::Frame;
use crate::core_modules::trajectory::TrajectorySample;
use crate::error::TrackingError;

const BOX_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i32 = 3;
const CENTROID_COLOUR: Rgb<u8> = Rgb([0, 255, 0]);
const CENTROID_RADIUS: i32 = 4;
const TEXT_COLOUR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_SCALE: f32 = 22.0;
const AXIS_COLOUR: Rgb<u8> = Rgb([0, 0, 255]);
const AXIS_LENGTH: f32 = 511.0;
const AXIS_THICKNESS: u32 = 5;

pub const STOP_HINT: &str = "Press \"q\" or Ctrl-C to stop tracking";

/// Everything drawn for a frame that produced a sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Annotation {
    pub blob: Blob,
    pub centroid: Point,
    pub sample: TrajectorySample,
}

impl Annotation {
    pub fn position_text(&self) -> String {
        format!("x: {:.1}, y: {:.1}", self.sample.x, self.sample.y)
    }

    pub fn time_text(&self) -> String {
        format!("Time = {:.2}", self.sample.timestamp)
    }
}

/// Draws detections onto copies of frames.
///
/// Without a font the geometry is still drawn; only the text is left out.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        if font.is_none() {
            log::info!("no overlay font configured, annotations carry no text");
        }
        Self { font }
    }

    /// Loads a TrueType/OpenType font for the overlay text.
    pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, TrackingError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            TrackingError::Config(format!("cannot read font {}: {e}", path.display()))
        })?;
        let font = FontVec::try_from_vec(data).map_err(|e| {
            TrackingError::Config(format!("invalid font {}: {e}", path.display()))
        })?;
        Ok(Self::new(Some(font)))
    }

    /// The annotator for a session's `[output]` settings.
    pub fn from_config(output: &OutputConfig) -> Result<Self, TrackingError> {
        match &output.font_path {
            Some(path) => Self::with_font_file(path),
            None => Ok(Self::new(None)),
        }
    }

    /// The frame as it goes to the video sinks. Frames without a detection
    /// are returned unchanged.
    pub fn annotate(&self, frame: &Frame, annotation: Option<&Annotation>) -> RgbImage {
        let mut canvas = frame.image().clone();
        let Some(annotation) = annotation else {
            return canvas;
        };

        let blob = annotation.blob;
        for inset in 0..BOX_THICKNESS {
            let rect = Rect::at(blob.x as i32 - inset, blob.y as i32 - inset)
                .of_size(blob.width + 2 * inset as u32, blob.height + 2 * inset as u32);
            draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOUR);
        }

        let centre = (annotation.centroid.x as i32, annotation.centroid.y as i32);
        draw_filled_circle_mut(&mut canvas, centre, CENTROID_RADIUS, CENTROID_COLOUR);

        if let Some(font) = &self.font {
            let scale = PxScale::from(TEXT_SCALE);
            draw_text_mut(
                &mut canvas,
                TEXT_COLOUR,
                centre.0,
                centre.1,
                scale,
                font,
                &annotation.position_text(),
            );
            draw_text_mut(&mut canvas, TEXT_COLOUR, 120, 80, scale, font, &annotation.time_text());
            draw_text_mut(&mut canvas, TEXT_COLOUR, 120, 120, scale, font, STOP_HINT);
        }

        canvas
    }

    /// X and Y guides along the top and left edges, for on-screen previews.
    pub fn draw_axis_guides(&self, canvas: &mut RgbImage) {
        for offset in 0..AXIS_THICKNESS {
            let o = offset as f32;
            draw_line_segment_mut(canvas, (0.0, o), (AXIS_LENGTH, o), AXIS_COLOUR);
            draw_line_segment_mut(canvas, (o, 0.0), (o, AXIS_LENGTH), AXIS_COLOUR);
        }
        if let Some(font) = &self.font {
            let scale = PxScale::from(TEXT_SCALE);
            draw_text_mut(canvas, TEXT_COLOUR, 250, 8, scale, font, "X");
            draw_text_mut(canvas, TEXT_COLOUR, 12, 250, scale, font, "Y");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation() -> Annotation {
        Annotation {
            blob: Blob {
                x: 40,
                y: 30,
                width: 20,
                height: 10,
                area: 200,
            },
            centroid: Point { x: 50, y: 35 },
            sample: TrajectorySample::new(1.1, 10.0, 7.0),
        }
    }

    #[test]
    fn overlay_texts() {
        let annotation = annotation();
        assert_eq!(annotation.position_text(), "x: 10.0, y: 7.0");
        assert_eq!(annotation.time_text(), "Time = 1.10");
    }

    #[test]
    fn frame_without_detection_is_untouched() {
        let frame = Frame::new(1, 10.0, RgbImage::from_pixel(32, 24, Rgb([9, 9, 9])));
        let annotator = Annotator::new(None);
        assert_eq!(&annotator.annotate(&frame, None), frame.image());
    }

    #[test]
    fn detection_draws_box_and_centroid() {
        let frame = Frame::new(11, 10.0, RgbImage::new(120, 80));
        let annotator = Annotator::new(None);
        let canvas = annotator.annotate(&frame, Some(&annotation()));

        assert_eq!(*canvas.get_pixel(40, 30), BOX_COLOUR);
        assert_eq!(*canvas.get_pixel(59, 39), BOX_COLOUR);
        assert_eq!(*canvas.get_pixel(50, 35), CENTROID_COLOUR);
        // Away from every mark.
        assert_eq!(*canvas.get_pixel(100, 70), Rgb([0, 0, 0]));
        // The source frame is not modified.
        assert_eq!(*frame.image().get_pixel(40, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn axis_guides_follow_the_edges() {
        let annotator = Annotator::new(None);
        let mut canvas = RgbImage::new(64, 48);
        annotator.draw_axis_guides(&mut canvas);
        assert_eq!(*canvas.get_pixel(60, 2), AXIS_COLOUR);
        assert_eq!(*canvas.get_pixel(2, 45), AXIS_COLOUR);
        assert_eq!(*canvas.get_pixel(30, 30), Rgb([0, 0, 0]));
    }

    #[test]
    fn unreadable_font_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Annotator::with_font_file(dir.path().join("none.ttf"));
        assert!(matches!(missing.err(), Some(TrackingError::Config(_))));

        let bogus = dir.path().join("bogus.ttf");
        std::fs::write(&bogus, b"not a font").unwrap();
        let invalid = Annotator::with_font_file(&bogus);
        assert!(matches!(invalid.err(), Some(TrackingError::Config(_))));
    }

    #[test]
    fn output_config_without_font_still_annotates() {
        let annotator = Annotator::from_config(&OutputConfig::default()).unwrap();
        let frame = Frame::new(11, 10.0, RgbImage::new(120, 80));
        let canvas = annotator.annotate(&frame, Some(&annotation()));
        assert_eq!(*canvas.get_pixel(40, 30), BOX_COLOUR);
    }

    #[test]
    fn output_config_font_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let output = OutputConfig {
            write_video: true,
            font_path: Some(dir.path().join("missing.ttf")),
        };
        let annotator = Annotator::from_config(&output);
        assert!(matches!(annotator.err(), Some(TrackingError::Config(_))));
    }
}
