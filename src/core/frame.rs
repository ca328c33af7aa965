//! Game and render frame timelines
//!
//! The streaming system runs on the game-frame timeline but must not touch
//! chunk memory that deferred render work may still be reading. The render
//! timeline can lag the game timeline by up to [`MAX_FRAMES_IN_FLIGHT`]
//! frames; a game frame whose render counterpart has finished is *retired*,
//! and only retired frames are safe points for reusing chunk memory.

/// How far the render timeline may trail the game timeline.
pub const MAX_FRAMES_IN_FLIGHT: i64 = 2;

/// Monotonic game/render frame counters.
///
/// `advance` is called once per game frame by the engine loop; the renderer
/// reports progress through `complete_render_frames_through`.
#[derive(Debug, Clone)]
pub struct FrameClock {
    game_frame: i64,
    prepared_frame: i64,
    completed_render_frame: i64,
    paused: bool,
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            game_frame: 0,
            prepared_frame: -1,
            completed_render_frame: -1,
            paused: false,
        }
    }

    /// Advance to the next game frame. The previous frame is considered
    /// prepared (handed to the renderer) at this point.
    pub fn advance(&mut self) {
        self.game_frame += 1;
        self.prepared_frame = self.prepared_frame.max(self.game_frame - 1);
    }

    /// Mark every render frame up to and including `frame` as complete.
    pub fn complete_render_frames_through(&mut self, frame: i64) {
        self.completed_render_frame = self.completed_render_frame.max(frame);
    }

    /// Mark the render timeline as fully caught up with prepared frames.
    pub fn render_caught_up(&mut self) {
        self.completed_render_frame = self.completed_render_frame.max(self.prepared_frame);
    }

    pub fn current_frame(&self) -> i64 {
        self.game_frame
    }

    pub fn last_prepared_frame(&self) -> i64 {
        self.prepared_frame
    }

    /// A frame is retired once its render counterpart has finished.
    pub fn has_frame_retired(&self, frame: i64) -> bool {
        frame <= self.completed_render_frame
    }

    pub fn is_render_frame_complete(&self, frame: i64) -> bool {
        frame <= self.completed_render_frame
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
