//! Utility types shared by every stage of the renderer.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`BBox3f`] - Axis-aligned bounds with SAH helpers
//! - Math type re-exports from glam

mod error;
mod math;

pub use error::*;
pub use math::*;
