use crate::data::{DataKind, DataObject};
use crate::error::{PipelineError, PipelineResult};
use crate::executive::{DataContext, InformationContext};
use crate::extent::Extent;
use crate::information::keys;
use crate::mtime::{MTime, ModTime};
use crate::time_steps::{resolve_time_step, time_range};
use crate::types::Algorithm;

/// A time varying structured source.  The value at every point is
/// `1000 * t + point index`, so consumers can tell which step they got.
pub struct TemporalSource {
    whole_extent: Extent,
    steps: Vec<f64>,
    mtime: MTime,
}

impl TemporalSource {
    pub fn new(whole_extent: Extent) -> Self {
        Self {
            whole_extent,
            steps: vec![0.0],
            mtime: MTime::new(),
        }
    }

    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    /// One step per integer in `first..=last`.
    pub fn set_time_step_range(&mut self, first: i64, last: i64) {
        self.steps = (first..=last).map(|t| t as f64).collect();
        self.mtime.modified();
    }

    pub fn set_time_step_values(&mut self, steps: Vec<f64>) -> PipelineResult<()> {
        if steps.iter().any(|t| !t.is_finite()) {
            return Err(PipelineError::configuration("time steps must be finite"));
        }
        let mut steps = steps;
        steps.sort_by(f64::total_cmp);
        self.steps = steps;
        self.mtime.modified();
        Ok(())
    }
}

impl Algorithm for TemporalSource {
    fn number_of_input_ports(&self) -> usize {
        0
    }

    fn mtime(&self) -> ModTime {
        self.mtime.get()
    }

    fn request_information(&mut self, ctx: &mut InformationContext) -> PipelineResult<()> {
        let info = ctx.output_mut(0);
        info.set(keys::WHOLE_EXTENT, self.whole_extent.as_array());
        info.set(keys::TIME_STEPS, self.steps.clone());
        if let Some(range) = time_range(&self.steps) {
            info.set(keys::TIME_RANGE, range);
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
        let request = ctx.request(0);
        let index = match request.time {
            Some(time) => resolve_time_step(&self.steps, time.value(), ctx.time_tolerance()),
            None => (!self.steps.is_empty()).then_some(0),
        };
        let time = index.map_or(0.0, |i| self.steps[i]);
        debug!("{} producing step {index:?} for {request}", ctx.stage());
        let values = (0..self.whole_extent.number_of_points())
            .map(|p| 1000.0 * time + p as f64)
            .collect();
        let mut data = DataObject::structured(DataKind::ImageData, self.whole_extent, values);
        if index.is_some() {
            data.set_time(time);
        }
        ctx.set_output(0, data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::executive::Pipeline;
    use crate::extent::UpdateRequest;

    fn source() -> TemporalSource {
        let mut source = TemporalSource::new(Extent::new(0, 1, 0, 0, 0, 0).unwrap());
        source.set_time_step_range(0, 9);
        source
    }

    #[test]
    fn publishes_steps_and_range() {
        let mut pipeline = Pipeline::new();
        let stage = pipeline.add(source());
        pipeline.update_information(stage).unwrap();
        let info = pipeline.output_information(stage, 0).unwrap();
        assert_eq!(info.length(keys::TIME_STEPS), 10);
        assert_eq!(info.get(keys::TIME_RANGE), Some([0.0, 9.0]));
    }

    #[test]
    fn snaps_to_the_step_at_or_before() {
        let mut pipeline = Pipeline::new();
        let stage = pipeline.add(source());
        pipeline
            .update(stage, UpdateRequest::whole().with_time(4.5).unwrap())
            .unwrap();
        let data = pipeline.output(stage, 0).unwrap();
        assert_eq!(data.time(), Some(4.0));
        assert_eq!(data.values(), &[4000.0, 4001.0]);

        pipeline.update(stage, UpdateRequest::whole()).unwrap();
        assert_eq!(pipeline.output(stage, 0).unwrap().time(), Some(0.0));
    }

    #[test]
    fn rejects_non_finite_steps() {
        let mut source = source();
        assert!(source.set_time_step_values(vec![0.0, f64::NAN]).is_err());
        source.set_time_step_values(vec![2.0, 1.0]).unwrap();
        assert_eq!(source.steps(), &[1.0, 2.0]);
    }
}
