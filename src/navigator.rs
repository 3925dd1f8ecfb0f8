use serde::{Deserialize, Serialize};

/// Cursor over the frames of the current detection result.
///
/// The cursor stays inside `[0, frame_count - 1]`; with no frames it is pinned
/// to 0 and reported as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameNavigator {
    current: usize,
    frame_count: usize,
}

impl FrameNavigator {
    pub fn new(frame_count: usize) -> Self {
        Self {
            current: 0,
            frame_count,
        }
    }

    /// Point at a new result with `frame_count` frames, cursor back to 0
    pub fn reset(&mut self, frame_count: usize) {
        self.current = 0;
        self.frame_count = frame_count;
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Whether navigation controls should be shown at all
    pub fn has_frames(&self) -> bool {
        self.frame_count > 0
    }

    /// Selected frame, `None` when there are no frames
    pub fn current(&self) -> Option<usize> {
        self.has_frames().then_some(self.current)
    }

    pub fn can_next(&self) -> bool {
        self.has_frames() && self.current + 1 < self.frame_count
    }

    pub fn can_previous(&self) -> bool {
        self.has_frames() && self.current > 0
    }

    /// Advance one frame. Returns whether the cursor moved.
    pub fn next(&mut self) -> bool {
        if !self.can_next() {
            return false;
        }
        self.current += 1;
        true
    }

    /// Step back one frame. Returns whether the cursor moved.
    pub fn previous(&mut self) -> bool {
        if !self.can_previous() {
            return false;
        }
        self.current -= 1;
        true
    }

    /// Jump to `index`, clamped to the last frame
    pub fn go_to(&mut self, index: usize) -> Option<usize> {
        if !self.has_frames() {
            return None;
        }
        self.current = index.min(self.frame_count - 1);
        Some(self.current)
    }

    /// "Frame 3 / 12" style caption, 1-based
    pub fn caption(&self) -> Option<String> {
        self.current()
            .map(|index| format!("Frame {} / {}", index + 1, self.frame_count))
    }
}
