//! Progressive rendering: options, tile grid, accumulation state machine,
//! device and denoiser contracts, and the scheduler driving them.

pub mod cpu;
pub mod denoise;
pub mod device;
pub mod options;
pub mod scheduler;
pub mod state;
pub mod tiles;
pub mod tonemap;

pub use cpu::CpuDevice;
pub use denoise::Denoiser;
pub use device::{FrameUniforms, PreviewRequest, RenderDevice, TileRequest};
pub use options::RenderOptions;
pub use scheduler::{PresentSource, TileScheduler};
pub use state::{FrameAction, FrameEvent, SchedulerState};
pub use tiles::{Tile, TileCursor, TileGrid};
