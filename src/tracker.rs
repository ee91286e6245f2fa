//! Narrow interface to the external detector and tracker.
//!
//! Detection and multi-object tracking run elsewhere; the targeting core only
//! sees the current frame's size and the list of tracks for that frame.

use crate::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::BufRead;

/// Camera frame dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl FrameSize {
    /// Create a frame size
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Frame area in square pixels
    #[must_use]
    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }
}

/// Axis-aligned pixel bounding box `(x1, y1, x2, y2)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    /// Left edge
    pub x1: f64,
    /// Top edge
    pub y1: f64,
    /// Right edge
    pub x2: f64,
    /// Bottom edge; the foot point sits on it
    pub y2: f64,
}

impl BoundingBox {
    /// Create a bounding box from its corners
    #[must_use]
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box area in square pixels
    #[must_use]
    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).abs() * (self.y2 - self.y1).abs()
    }

    /// Aim point: horizontal centre of the bottom edge, where the target meets the floor
    #[must_use]
    pub fn foot_point(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, self.y2)
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One tracked object in the current frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Identifier that stays stable across frames
    pub id: u64,
    /// Pixel bounding box in the current frame
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
}

impl Track {
    /// Create a track
    #[must_use]
    pub const fn new(id: u64, bounding_box: BoundingBox) -> Self {
        Self { id, bounding_box }
    }
}

/// Keep only tracks whose box covers between `min_fraction` and `max_fraction`
/// of the frame area
#[must_use]
pub fn filter_by_area(
    tracks: Vec<Track>,
    frame: FrameSize,
    min_fraction: f64,
    max_fraction: f64,
) -> Vec<Track> {
    let total = frame.area();
    let (min_area, max_area) = (min_fraction * total, max_fraction * total);
    tracks
        .into_iter()
        .filter(|t| {
            let area = t.bounding_box.area();
            let keep = (min_area..=max_area).contains(&area);
            if !keep {
                debug!("Dropping track {} with area {:.0}px²", t.id, area);
            }
            keep
        })
        .collect()
}

/// Source of per-frame track lists
pub trait TrackSource: Send {
    /// Tracks for the next frame, or `None` once the source is exhausted
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying source fails to produce a frame.
    fn current_tracks(&mut self) -> Result<Option<Vec<Track>>>;

    /// Size of the most recent frame, if one has been seen
    fn frame_size(&self) -> Option<FrameSize>;
}

/// One frame of tracker output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Tracks visible in this frame
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl TrackFrame {
    /// Frame dimensions
    #[must_use]
    pub const fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Replays a fixed sequence of frames
#[derive(Debug, Clone, Default)]
pub struct ScriptedTrackSource {
    frames: VecDeque<TrackFrame>,
    size: Option<FrameSize>,
}

impl ScriptedTrackSource {
    /// Create a source that yields the given frames in order
    #[must_use]
    pub fn new(frames: impl IntoIterator<Item = TrackFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            size: None,
        }
    }

    /// Append a frame to the end of the script
    pub fn push(&mut self, frame: TrackFrame) {
        self.frames.push_back(frame);
    }

    /// Number of frames not yet consumed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl TrackSource for ScriptedTrackSource {
    fn current_tracks(&mut self) -> Result<Option<Vec<Track>>> {
        Ok(self.frames.pop_front().map(|frame| {
            self.size = Some(frame.size());
            frame.tracks
        }))
    }

    fn frame_size(&self) -> Option<FrameSize> {
        self.size
    }
}

/// Reads one JSON-encoded [`TrackFrame`] per line
///
/// Blank lines are skipped and malformed lines are logged and skipped, so a
/// single bad record from the tracker does not end the session.
pub struct JsonLinesTrackSource<R> {
    reader: R,
    size: Option<FrameSize>,
    line: String,
}

impl<R: BufRead> JsonLinesTrackSource<R> {
    /// Wrap a buffered reader
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            size: None,
            line: String::new(),
        }
    }
}

impl<R: BufRead + Send> TrackSource for JsonLinesTrackSource<R> {
    fn current_tracks(&mut self) -> Result<Option<Vec<Track>>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<TrackFrame>(trimmed) {
                Ok(frame) => {
                    self.size = Some(frame.size());
                    return Ok(Some(frame.tracks));
                }
                Err(e) => warn!("Skipping malformed track frame: {}", Error::from(e)),
            }
        }
    }

    fn frame_size(&self) -> Option<FrameSize> {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_foot_point() {
        let b = BoundingBox::new(100.0, 50.0, 200.0, 300.0);
        assert_eq!(b.foot_point(), (150.0, 300.0));
        assert_eq!(b.area(), 25_000.0);
    }

    #[test]
    fn test_area_filter() {
        let frame = FrameSize::new(640, 480);
        let tracks = vec![
            // 4 px², below 0.3% of the frame
            Track::new(1, BoundingBox::new(0.0, 0.0, 2.0, 2.0)),
            Track::new(2, BoundingBox::new(100.0, 100.0, 200.0, 300.0)),
            // Whole frame, above 90%
            Track::new(3, BoundingBox::new(0.0, 0.0, 640.0, 480.0)),
        ];
        let kept = filter_by_area(tracks, frame, 0.003, 0.9);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, 2);
    }

    #[test]
    fn test_scripted_source() {
        let mut source = ScriptedTrackSource::new(vec![
            TrackFrame {
                width: 640,
                height: 480,
                tracks: vec![Track::new(7, BoundingBox::new(0.0, 0.0, 10.0, 10.0))],
            },
            TrackFrame {
                width: 1280,
                height: 720,
                tracks: vec![],
            },
        ]);
        assert_eq!(source.frame_size(), None);

        let first = source.current_tracks().unwrap().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(source.frame_size(), Some(FrameSize::new(640, 480)));

        let second = source.current_tracks().unwrap().unwrap();
        assert!(second.is_empty());
        assert_eq!(source.frame_size(), Some(FrameSize::new(1280, 720)));

        assert!(source.current_tracks().unwrap().is_none());
    }

    #[test]
    fn test_json_lines_source() {
        let input = concat!(
            r#"{"width":640,"height":480,"tracks":[{"id":1,"bbox":[10,20,30,40]}]}"#,
            "\n\nnot json\n",
            r#"{"width":640,"height":480}"#,
            "\n"
        );
        let mut source = JsonLinesTrackSource::new(Cursor::new(input));

        let first = source.current_tracks().unwrap().unwrap();
        assert_eq!(first, vec![Track::new(1, BoundingBox::new(10.0, 20.0, 30.0, 40.0))]);

        // Blank and malformed lines are skipped
        let second = source.current_tracks().unwrap().unwrap();
        assert!(second.is_empty());
        assert_eq!(source.frame_size(), Some(FrameSize::new(640, 480)));

        assert!(source.current_tracks().unwrap().is_none());
    }
}
