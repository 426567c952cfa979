use crate::data::{DataKind, DataObject};
use crate::error::{PipelineError, PipelineResult};
use crate::executive::{DataContext, UpdateExtentContext};
use crate::information::keys;
use crate::mtime::{MTime, ModTime};
use crate::types::{Algorithm, InputPort};

/// Bounding box of structured input, as the eight corner points of a
/// polygonal outline.
///
/// Only the input's bounds matter, so a producer that cannot stream may hand
/// over more than was asked for.
#[derive(Default)]
pub struct OutlineFilter {
    mtime: MTime,
}

impl OutlineFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Algorithm for OutlineFilter {
    fn input_port(&self, _port: usize) -> InputPort {
        InputPort::accepting(&[DataKind::ImageData, DataKind::RectilinearGrid])
    }

    fn mtime(&self) -> ModTime {
        self.mtime.get()
    }

    fn request_update_extent(&mut self, ctx: &mut UpdateExtentContext) -> PipelineResult<()> {
        let request = ctx.request();
        let whole = ctx.input_information(0, 0).and_then(|info| info.get(keys::WHOLE_EXTENT));
        if let Some(extent) = request.extent {
            if whole != Some(extent.as_array()) {
                ctx.set_input_request(0, 0, request.with_exact(false));
            }
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
        let input = ctx.required_input(0, 0)?;
        let extent = input
            .extent()
            .ok_or_else(|| PipelineError::data("outline input has no extent"))?;
        let info = ctx.input_information(0, 0);
        let origin = info.and_then(|info| info.get(keys::ORIGIN)).unwrap_or([0.0; 3]);
        let spacing = info.and_then(|info| info.get(keys::SPACING)).unwrap_or([1.0; 3]);
        let mut bounds = [0.0; 6];
        for axis in 0..3 {
            bounds[2 * axis] = origin[axis] + spacing[axis] * extent.min(axis) as f64;
            bounds[2 * axis + 1] = origin[axis] + spacing[axis] * extent.max(axis) as f64;
        }
        let mut corners = Vec::with_capacity(24);
        for k in 0..2 {
            for j in 0..2 {
                for i in 0..2 {
                    corners.extend([bounds[i], bounds[2 + j], bounds[4 + k]]);
                }
            }
        }
        let mut output = DataObject::new(DataKind::PolyData);
        output.set_payload(corners.into());
        output.set_bounds(bounds);
        if let Some(time) = input.time() {
            output.set_time(time);
        }
        ctx.set_output(0, output);
        Ok(())
    }
}
