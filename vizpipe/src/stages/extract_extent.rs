use crate::data::DataKind;
use crate::error::{PipelineError, PipelineResult};
use crate::executive::{DataContext, InformationContext, UpdateExtentContext};
use crate::extent::Extent;
use crate::information::keys;
use crate::mtime::{MTime, ModTime};
use crate::types::{Algorithm, InputPort};

/// Restricts structured input to a volume of interest.  The output's whole
/// extent is the volume of interest clipped to the input's.
#[derive(Default)]
pub struct ExtractExtent {
    voi: Option<Extent>,
    mtime: MTime,
}

impl ExtractExtent {
    pub fn new(voi: Extent) -> Self {
        Self {
            voi: Some(voi),
            mtime: MTime::new(),
        }
    }

    pub fn voi(&self) -> Option<Extent> {
        self.voi
    }

    pub fn set_voi(&mut self, voi: Extent) {
        self.voi = Some(voi);
        self.mtime.modified();
    }
}

impl Algorithm for ExtractExtent {
    fn input_port(&self, _port: usize) -> InputPort {
        InputPort::accepting(&[DataKind::ImageData, DataKind::RectilinearGrid])
    }

    fn mtime(&self) -> ModTime {
        self.mtime.get()
    }

    fn request_information(&mut self, ctx: &mut InformationContext) -> PipelineResult<()> {
        let whole = Extent::from_array(ctx.required_input(0, 0)?.require(keys::WHOLE_EXTENT)?)?;
        let voi = match self.voi {
            Some(voi) => voi
                .clip(&whole)
                .ok_or_else(|| PipelineError::InvalidExtent(format!("{voi} lies outside {whole}")))?,
            None => whole,
        };
        ctx.output_mut(0).set(keys::WHOLE_EXTENT, voi.as_array());
        Ok(())
    }

    fn request_update_extent(&mut self, ctx: &mut UpdateExtentContext) -> PipelineResult<()> {
        let request = ctx.request();
        let wanted = match request.extent {
            Some(extent) => Some(extent),
            None => ctx
                .output_information(0)
                .and_then(|info| info.get(keys::WHOLE_EXTENT))
                .map(Extent::from_array)
                .transpose()?,
        };
        if let Some(extent) = wanted {
            ctx.set_input_request(0, 0, request.with_extent(extent).with_exact(false));
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
        let input = ctx.required_input(0, 0)?;
        let request = ctx.request(0);
        let target = match request.extent {
            Some(extent) => extent,
            None => ctx
                .output_information(0)
                .and_then(|info| info.get(keys::WHOLE_EXTENT))
                .map(Extent::from_array)
                .transpose()?
                .ok_or_else(|| PipelineError::configuration("no volume of interest"))?,
        };
        let output = input.cropped(&target).ok_or_else(|| {
            PipelineError::data(format!(
                "input {} does not cover {target}",
                input.extent().map_or_else(|| "without extent".to_string(), |e| e.to_string())
            ))
        })?;
        ctx.set_output(0, output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::executive::{Demand, Pipeline};
    use crate::extent::UpdateRequest;
    use crate::stages::ImageSource;

    fn ext(bounds: [i64; 6]) -> Extent {
        Extent::from_array(bounds).unwrap()
    }

    #[test]
    fn sibling_requests_are_unioned() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 9, 0, 9, 0, 0])));
        let a = pipeline.add(ExtractExtent::new(ext([0, 4, 0, 4, 0, 0])));
        let b = pipeline.add(ExtractExtent::new(ext([3, 8, 2, 9, 0, 0])));
        pipeline.connect(source, a).unwrap();
        pipeline.connect(source, b).unwrap();
        pipeline
            .update_all(&[
                Demand::new(a.id(), 0, UpdateRequest::whole()),
                Demand::new(b.id(), 0, UpdateRequest::whole()),
            ])
            .unwrap();
        assert_eq!(pipeline.execute_count(source), 1);
        assert_eq!(pipeline.output(source, 0).unwrap().extent(), Some(ext([0, 8, 0, 9, 0, 0])));
        let a_out = pipeline.output(a, 0).unwrap();
        assert_eq!(a_out.extent(), Some(ext([0, 4, 0, 4, 0, 0])));
        assert_eq!(a_out.value_at([4, 4, 0]), Some(404.0));
        assert_eq!(pipeline.output(b, 0).unwrap().extent(), Some(ext([3, 8, 2, 9, 0, 0])));
    }

    #[test]
    fn voi_is_clipped_to_input() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 5, 0, 5, 0, 0])));
        let extract = pipeline.add(ExtractExtent::new(ext([3, 9, 3, 9, 0, 0])));
        pipeline.connect(source, extract).unwrap();
        pipeline.update(extract, UpdateRequest::whole()).unwrap();
        let info = pipeline.output_information(extract, 0).unwrap();
        assert_eq!(info.get(keys::WHOLE_EXTENT), Some([3, 5, 3, 5, 0, 0]));
        assert_eq!(pipeline.output(extract, 0).unwrap().extent(), Some(ext([3, 5, 3, 5, 0, 0])));

        pipeline
            .algorithm_mut(extract)
            .unwrap()
            .set_voi(ext([7, 9, 7, 9, 0, 0]));
        let err = pipeline.update(extract, UpdateRequest::whole()).unwrap_err();
        assert!(matches!(err.root(), PipelineError::InvalidExtent(_)));
        // the previous output survives
        assert_eq!(pipeline.output(extract, 0).unwrap().extent(), Some(ext([3, 5, 3, 5, 0, 0])));
    }
}
