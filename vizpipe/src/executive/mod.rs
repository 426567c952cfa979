//! The executive: owns the stages of a pipeline and drives them through the
//! information, update extent and execute passes.

mod context;
mod options;
mod pipeline;

pub use context::*;
pub use options::*;
pub use pipeline::*;
