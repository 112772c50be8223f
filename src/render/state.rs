//! Progressive accumulation state machine.
//!
//! [`SchedulerState::advance`] is a pure transition: it never touches buffers
//! or devices, it only says what the frame has to do. The scheduler performs
//! the returned [`FrameAction`] and stores the new state.

use super::tiles::{TileCursor, TileGrid};

/// Input of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEvent {
    /// The scene changed; accumulated samples are stale.
    Dirty,
    Clean { max_samples: Option<u32> },
}

/// What the frame has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAction {
    /// Clear accumulation and render the low-resolution preview.
    Preview,
    /// Render one tile of sample `sample` and write output buffer `buffer`.
    RenderTile {
        cursor: TileCursor,
        sample: u32,
        buffer: usize,
        /// The tile closed a pass over the grid.
        pass_complete: bool,
    },
    /// Sample budget reached; nothing to do.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerState {
    /// Sample currently being accumulated, starting at 1.
    pub sample_counter: u32,
    /// Tile frames since the last reset, starting at 1.
    pub frame_counter: u32,
    /// Next tile to render.
    pub cursor: TileCursor,
    /// Output buffer being written; `1 - current_buffer` is displayed.
    pub current_buffer: usize,
    /// A denoised image of the displayed buffer exists.
    pub denoised: bool,
}

impl SchedulerState {
    pub fn new(grid: &TileGrid) -> Self {
        Self {
            sample_counter: 1,
            frame_counter: 1,
            cursor: grid.first(),
            current_buffer: 0,
            denoised: false,
        }
    }

    pub fn displayed_buffer(&self) -> usize {
        1 - self.current_buffer
    }

    pub fn is_finished(&self, max_samples: Option<u32>) -> bool {
        max_samples.is_some_and(|max| self.sample_counter >= max)
    }

    /// Transition for one frame.
    pub fn advance(self, grid: &TileGrid, event: FrameEvent) -> (Self, FrameAction) {
        match event {
            FrameEvent::Dirty => (Self::new(grid), FrameAction::Preview),
            FrameEvent::Clean { max_samples } if self.is_finished(max_samples) => (self, FrameAction::Idle),
            FrameEvent::Clean { .. } => {
                let action_cursor = self.cursor;
                let action_sample = self.sample_counter;
                let action_buffer = self.current_buffer;

                let mut next = self;
                next.frame_counter += 1;
                let pass_complete = match grid.advance(self.cursor) {
                    Some(c) => {
                        next.cursor = c;
                        false
                    }
                    None => {
                        next.cursor = grid.first();
                        next.sample_counter += 1;
                        next.current_buffer = 1 - next.current_buffer;
                        true
                    }
                };

                (
                    next,
                    FrameAction::RenderTile {
                        cursor: action_cursor,
                        sample: action_sample,
                        buffer: action_buffer,
                        pass_complete,
                    },
                )
            }
        }
    }

    /// Whether the displayed buffer should be denoised this frame.
    ///
    /// Runs once as soon as a full pass exists, then every
    /// `denoiser_frame_count` passes.
    ///
    /// Called on the state after [`advance`](Self::advance), so it sees the
    /// counters and the displayed buffer that the start of the next frame
    /// would see. With a denoised image present, the periodic run lands on
    /// the tile frame whose post-advance `frame_counter` is a multiple of
    /// the period, one tile before that pass completes.
    pub fn should_denoise(&self, enabled: bool, denoiser_frame_count: u32, tile_count: u32) -> bool {
        if !enabled || self.sample_counter <= 1 {
            return false;
        }
        let period = denoiser_frame_count.max(1) * tile_count.max(1);
        !self.denoised || self.frame_counter % period == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN: FrameEvent = FrameEvent::Clean { max_samples: None };

    fn run(grid: &TileGrid, n: u32) -> SchedulerState {
        (0..n).fold(SchedulerState::new(grid), |s, _| s.advance(grid, CLEAN).0)
    }

    #[test]
    fn test_two_by_two_flips_after_four() {
        let grid = TileGrid::new(200, 200, 100, 100);
        let s = run(&grid, 3);
        assert_eq!(s.sample_counter, 1);
        assert_eq!(s.current_buffer, 0);
        let (s, action) = s.advance(&grid, CLEAN);
        assert_eq!(s.sample_counter, 2);
        assert_eq!(s.current_buffer, 1);
        assert_eq!(s.cursor, grid.first());
        assert!(matches!(action, FrameAction::RenderTile { pass_complete: true, sample: 1, buffer: 0, .. }));
    }

    #[test]
    fn test_sample_count_formula() {
        for (w, h, t) in [(100, 100, 100), (300, 200, 100), (33, 17, 8)] {
            let grid = TileGrid::new(w, h, t, t);
            let tiles = grid.tile_count();
            for n in [0, 1, tiles - 1, tiles, tiles + 1, 5 * tiles + 2] {
                assert_eq!(run(&grid, n).sample_counter, 1 + n / tiles, "grid {w}x{h}/{t}, n={n}");
            }
        }
    }

    #[test]
    fn test_dirty_resets_from_any_state() {
        let grid = TileGrid::new(300, 200, 100, 100);
        let mut s = run(&grid, 17);
        s.denoised = true;
        let (s, action) = s.advance(&grid, FrameEvent::Dirty);
        assert_eq!(action, FrameAction::Preview);
        assert_eq!(s, SchedulerState::new(&grid));
    }

    #[test]
    fn test_max_samples_idle() {
        let grid = TileGrid::new(100, 100, 100, 100);
        let done = FrameEvent::Clean { max_samples: Some(3) };
        let s = run(&grid, 2);
        assert_eq!(s.sample_counter, 3);
        let (s2, action) = s.advance(&grid, done);
        assert_eq!(action, FrameAction::Idle);
        assert_eq!(s2, s);
    }

    #[test]
    fn test_single_tile_grid() {
        let grid = TileGrid::new(1, 1, 1, 1);
        let (s, action) = SchedulerState::new(&grid).advance(&grid, CLEAN);
        assert!(matches!(action, FrameAction::RenderTile { pass_complete: true, .. }));
        assert_eq!(s.sample_counter, 2);
    }

    #[test]
    fn test_denoise_period_phase() {
        let grid = TileGrid::new(300, 100, 100, 100);
        let tiles = grid.tile_count();
        let period = 2 * tiles;
        let mut s = run(&grid, tiles);
        s.denoised = true;

        let mut hits = Vec::new();
        for n in tiles + 1..=4 * period {
            s = s.advance(&grid, CLEAN).0;
            if s.should_denoise(true, 2, tiles) {
                hits.push(n);
            }
        }
        assert_eq!(hits, vec![period - 1, 2 * period - 1, 3 * period - 1, 4 * period - 1]);
    }

    #[test]
    fn test_denoise_cadence() {
        let grid = TileGrid::new(200, 100, 100, 100);
        let tiles = grid.tile_count();
        let mut s = SchedulerState::new(&grid);
        assert!(!s.should_denoise(true, 2, tiles), "nothing to denoise in the first pass");

        s = run(&grid, tiles);
        assert!(s.should_denoise(true, 2, tiles));
        assert!(!s.should_denoise(false, 2, tiles));

        s.denoised = true;
        assert!(!s.should_denoise(true, 2, tiles));
        s.frame_counter = 2 * tiles * 3;
        assert!(s.should_denoise(true, 2, tiles));
    }
}
