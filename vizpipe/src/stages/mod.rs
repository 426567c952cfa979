//! Ready made stages: sources, temporal stages and structured filters.

mod extract_extent;
mod ghost_cells;
mod group;
mod image_source;
mod outline;
mod temporal_cache;
mod temporal_shift_scale;
mod temporal_source;

pub use extract_extent::*;
pub use ghost_cells::*;
pub use group::*;
pub use image_source::*;
pub use outline::*;
pub use temporal_cache::*;
pub use temporal_shift_scale::*;
pub use temporal_source::*;
