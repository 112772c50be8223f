//! Tile grid covering the output image.
//!
//! Tile rows are counted upward from the bottom edge of the image, so the
//! cursor's starting row `rows - 1` is the top strip and partial tiles sit on
//! the right and top edges.

/// Grid position of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCursor {
    pub x: u32,
    pub y: u32,
}

/// Pixel region of a tile in image coordinates (origin top-left).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    /// May be smaller than the tile width at the right edge.
    pub width: u32,
    /// May be smaller than the tile height at the top edge.
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub cols: u32,
    pub rows: u32,
}

impl TileGrid {
    pub fn new(image_width: u32, image_height: u32, tile_width: u32, tile_height: u32) -> Self {
        let image_width = image_width.max(1);
        let image_height = image_height.max(1);
        let tile_width = tile_width.clamp(1, image_width);
        let tile_height = tile_height.clamp(1, image_height);
        Self {
            image_width,
            image_height,
            tile_width,
            tile_height,
            cols: image_width.div_ceil(tile_width),
            rows: image_height.div_ceil(tile_height),
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.cols * self.rows
    }

    /// Cursor of the first tile of every pass.
    pub fn first(&self) -> TileCursor {
        TileCursor {
            x: 0,
            y: self.rows - 1,
        }
    }

    /// Next cursor in scheduling order, or `None` after the last tile of a pass.
    pub fn advance(&self, c: TileCursor) -> Option<TileCursor> {
        if c.x + 1 < self.cols {
            Some(TileCursor { x: c.x + 1, y: c.y })
        } else if c.y > 0 {
            Some(TileCursor { x: 0, y: c.y - 1 })
        } else {
            None
        }
    }

    /// Pixel region of `c`, clipped to the image.
    pub fn tile(&self, c: TileCursor) -> Tile {
        let x = c.x * self.tile_width;
        let width = self.tile_width.min(self.image_width - x);
        let bottom_up = c.y * self.tile_height;
        let height = self.tile_height.min(self.image_height - bottom_up);
        Tile {
            x,
            y: self.image_height - bottom_up - height,
            width,
            height,
        }
    }

    /// Every cursor of one pass in scheduling order.
    pub fn pass(&self) -> impl Iterator<Item = TileCursor> + '_ {
        std::iter::successors(Some(self.first()), move |&c| self.advance(c))
    }
}
