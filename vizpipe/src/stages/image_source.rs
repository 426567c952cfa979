use crate::data::{DataKind, DataObject};
use crate::error::PipelineResult;
use crate::executive::{DataContext, InformationContext};
use crate::extent::Extent;
use crate::information::keys;
use crate::mtime::{MTime, ModTime};
use crate::translator::SplitMode;
use crate::types::Algorithm;

/// Point values on a regular grid, computed by a function of the point
/// index.  Stands in for a structured reader.
pub struct ImageSource {
    whole_extent: Extent,
    origin: [f64; 3],
    spacing: [f64; 3],
    split_mode: SplitMode,
    always_whole: bool,
    function: Box<dyn Fn([i64; 3]) -> f64>,
    mtime: MTime,
}

impl ImageSource {
    pub fn new(whole_extent: Extent) -> Self {
        Self {
            whole_extent,
            origin: [0.0; 3],
            spacing: [1.0; 3],
            split_mode: SplitMode::default(),
            always_whole: false,
            function: Box::new(Self::index_value),
            mtime: MTime::new(),
        }
    }

    /// `i + 100 j + 10000 k`
    pub fn index_value([i, j, k]: [i64; 3]) -> f64 {
        (i + 100 * j + 10000 * k) as f64
    }

    pub fn whole_extent(&self) -> Extent {
        self.whole_extent
    }

    pub fn set_whole_extent(&mut self, whole_extent: Extent) {
        self.whole_extent = whole_extent;
        self.mtime.modified();
    }

    pub fn set_origin(&mut self, origin: [f64; 3]) {
        self.origin = origin;
        self.mtime.modified();
    }

    pub fn set_spacing(&mut self, spacing: [f64; 3]) {
        self.spacing = spacing;
        self.mtime.modified();
    }

    pub fn set_split_mode(&mut self, split_mode: SplitMode) {
        self.split_mode = split_mode;
        self.mtime.modified();
    }

    /// Produce the whole extent whatever is asked for, like a reader that
    /// cannot stream.
    pub fn set_always_whole(&mut self, always_whole: bool) {
        self.always_whole = always_whole;
        self.mtime.modified();
    }

    pub fn set_function(&mut self, function: impl Fn([i64; 3]) -> f64 + 'static) {
        self.function = Box::new(function);
        self.mtime.modified();
    }
}

impl Algorithm for ImageSource {
    fn number_of_input_ports(&self) -> usize {
        0
    }

    fn mtime(&self) -> ModTime {
        self.mtime.get()
    }

    fn request_information(&mut self, ctx: &mut InformationContext) -> PipelineResult<()> {
        let info = ctx.output_mut(0);
        info.set(keys::WHOLE_EXTENT, self.whole_extent.as_array());
        info.set(keys::ORIGIN, self.origin);
        info.set(keys::SPACING, self.spacing);
        info.set(keys::SPLIT_MODE, self.split_mode.to_string());
        info.set(keys::CAN_PRODUCE_SUB_EXTENT, !self.always_whole);
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
        let request = ctx.request(0);
        let extent = match request.extent {
            Some(extent) if !self.always_whole => extent,
            _ => self.whole_extent,
        };
        let mut values = Vec::with_capacity(extent.number_of_points());
        let slabs = extent.dimensions()[2];
        for (n, k) in (extent.min(2)..=extent.max(2)).enumerate() {
            ctx.check_abort()?;
            for j in extent.min(1)..=extent.max(1) {
                for i in extent.min(0)..=extent.max(0) {
                    values.push((self.function)([i, j, k]));
                }
            }
            ctx.update_progress((n + 1) as f64 / slabs as f64);
        }
        let mut data = DataObject::structured(DataKind::ImageData, extent, values);
        let mut bounds = [0.0; 6];
        for axis in 0..3 {
            bounds[2 * axis] = self.origin[axis] + self.spacing[axis] * extent.min(axis) as f64;
            bounds[2 * axis + 1] = self.origin[axis] + self.spacing[axis] * extent.max(axis) as f64;
        }
        data.set_bounds(bounds);
        data.set_ghost_levels(request.ghost_levels());
        ctx.set_output(0, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::executive::Pipeline;
    use crate::extent::UpdateRequest;
    use crate::translator::ExtentTranslator;

    fn ext(bounds: [i64; 6]) -> Extent {
        Extent::from_array(bounds).unwrap()
    }

    #[test]
    fn produces_requested_extent() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 9, 0, 9, 0, 0])));
        let request = UpdateRequest::whole().with_extent(ext([2, 3, 4, 5, 0, 0]));
        pipeline.update(source, request).unwrap();
        let data = pipeline.output(source, 0).unwrap();
        assert_eq!(data.extent(), Some(ext([2, 3, 4, 5, 0, 0])));
        assert_eq!(data.value_at([3, 5, 0]), Some(503.0));
        assert_eq!(data.bounds(), Some([2.0, 3.0, 4.0, 5.0, 0.0, 0.0]));
    }

    #[test]
    fn pieces_are_translated_with_the_published_split_mode() {
        let mut pipeline = Pipeline::new();
        let whole = ext([0, 9, 0, 9, 0, 0]);
        let source = pipeline.add(ImageSource::new(whole));
        pipeline.algorithm_mut(source).unwrap().set_split_mode(SplitMode::XSlab);
        pipeline
            .update(source, UpdateRequest::whole().with_piece(1, 2, 0).unwrap())
            .unwrap();
        let expected = ExtentTranslator::new(SplitMode::XSlab).piece_extent(&whole, 1, 2);
        assert_eq!(pipeline.output(source, 0).unwrap().extent(), expected);
        assert_eq!(expected, Some(ext([4, 9, 0, 9, 0, 0])));
    }

    #[test]
    fn publishes_information() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 4, 0, 4, 0, 4])));
        pipeline.update_information(source).unwrap();
        let info = pipeline.output_information(source, 0).unwrap();
        assert_eq!(info.get(keys::WHOLE_EXTENT), Some([0, 4, 0, 4, 0, 4]));
        assert_eq!(info.get(keys::SPLIT_MODE).as_deref(), Some("Block"));
        assert_eq!(info.get(keys::PRODUCER).as_deref(), Some("ImageSource"));
        assert_eq!(info.get(keys::CAN_PRODUCE_SUB_EXTENT), Some(true));
    }
}
