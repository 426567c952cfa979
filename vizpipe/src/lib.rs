#![warn(clippy::perf)]
#![allow(clippy::type_complexity)]
#![doc = include_str!("../README.md")]

//! ## Writing a stage
//!
//! A stage is anything implementing [Algorithm].  Only
//! [Algorithm::mtime] and [Algorithm::request_data] are required; the other
//! callbacks default to passing information and requests straight through.
//!
//! ```rust
//! use vizpipe::*;
//!
//! #[derive(Default)]
//! struct Negate {
//!     mtime: MTime,
//! }
//!
//! impl Algorithm for Negate {
//!     fn mtime(&self) -> ModTime {
//!         self.mtime.get()
//!     }
//!
//!     fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
//!         let mut data = ctx.required_input(0, 0)?.clone();
//!         data.values_mut().iter_mut().for_each(|v| *v = -*v);
//!         ctx.set_output(0, data);
//!         Ok(())
//!     }
//! }
//!
//! let mut pipeline = Pipeline::new();
//! let source = pipeline.add(ImageSource::new(Extent::new(0, 3, 0, 0, 0, 0)?));
//! let negate = pipeline.add(Negate::default());
//! pipeline.connect(source, negate)?;
//! pipeline.update(negate, UpdateRequest::whole())?;
//! assert_eq!(pipeline.output(negate, 0).map(DataObject::values), Some(&[-0.0, -1.0, -2.0, -3.0][..]));
//! // the source's buffer was copied, not modified
//! assert_eq!(pipeline.output(source, 0).map(DataObject::values), Some(&[0.0, 1.0, 2.0, 3.0][..]));
//! # Ok::<(), PipelineError>(())
//! ```
//!
//! Setters on a stage must call [MTime::modified] so the executive knows to
//! run it again.  Parameters are changed through
//! [Pipeline::algorithm_mut], using the typed [StageHandle] returned by
//! [Pipeline::add].

#[macro_use]
extern crate log;
extern crate derive_new;

mod bencher;
pub mod cache;
pub mod controller;
mod data;
mod error;
mod executive;
mod extent;
pub mod information;
mod mtime;
pub mod stages;
mod time_steps;
mod translator;
mod types;

pub use bencher::*;
pub use cache::{DataCache, HeapAllocator, PayloadAllocator, PoolAllocator};
pub use controller::{Controller, DummyController, ThreadedController};
pub use data::*;
pub use error::*;
pub use executive::*;
pub use extent::*;
pub use information::{Information, InfoKey, keys};
pub use mtime::*;
pub use stages::*;
pub use time_steps::*;
pub use translator::*;
pub use types::*;
