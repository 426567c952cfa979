use crate::data::DataObject;
use crate::error::{PipelineError, PipelineResult};
use crate::executive::{DataContext, InformationContext};
use crate::information::keys;
use crate::mtime::{MTime, ModTime};
use crate::time_steps::{merge_time_steps, time_range};
use crate::types::{Algorithm, InputPort};

/// Gathers every connection of its single repeatable input into one
/// multi-block dataset.  The published time steps are the union of the
/// inputs' steps.
#[derive(Default)]
pub struct GroupDataSets {
    mtime: MTime,
}

impl GroupDataSets {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Algorithm for GroupDataSets {
    fn input_port(&self, _port: usize) -> InputPort {
        InputPort::any().repeatable()
    }

    fn mtime(&self) -> ModTime {
        self.mtime.get()
    }

    fn request_information(&mut self, ctx: &mut InformationContext) -> PipelineResult<()> {
        let lists: Vec<Vec<f64>> = ctx
            .inputs(0)
            .filter_map(|info| info.get(keys::TIME_STEPS))
            .collect();
        let steps = merge_time_steps(lists.iter().map(Vec::as_slice), ctx.time_tolerance());
        let info = ctx.output_mut(0);
        // a composite has no single extent
        info.remove(keys::WHOLE_EXTENT);
        info.remove(keys::ORIGIN);
        info.remove(keys::SPACING);
        info.remove(keys::SPLIT_MODE);
        match time_range(&steps) {
            Some(range) => {
                info.set(keys::TIME_RANGE, range);
                info.set(keys::TIME_STEPS, steps);
            }
            None => {
                info.remove(keys::TIME_RANGE);
                info.remove(keys::TIME_STEPS);
            }
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
        let connections = ctx.number_of_connections(0);
        let blocks: Vec<DataObject> = ctx.inputs(0).cloned().collect();
        if blocks.len() != connections {
            return Err(PipelineError::data(format!(
                "{} of {connections} inputs have data",
                blocks.len()
            )));
        }
        let mut output = DataObject::multi_block(blocks);
        if let Some(time) = ctx.request(0).time {
            output.set_time(time.value());
        }
        ctx.set_output(0, output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::data::DataKind;
    use crate::executive::Pipeline;
    use crate::extent::{Extent, UpdateRequest};
    use crate::stages::{ImageSource, TemporalSource};

    #[test]
    fn groups_inputs_and_merges_steps() {
        let mut pipeline = Pipeline::new();
        let extent = Extent::new(0, 1, 0, 0, 0, 0).unwrap();
        let mut early = TemporalSource::new(extent);
        early.set_time_step_values(vec![0.0, 1.0, 2.0]).unwrap();
        let mut late = TemporalSource::new(extent);
        late.set_time_step_values(vec![2.0, 3.0]).unwrap();
        let early = pipeline.add(early);
        let late = pipeline.add(late);
        let group = pipeline.add(GroupDataSets::new());
        pipeline.add_input_connection(group, 0, early, 0).unwrap();
        pipeline.add_input_connection(group, 0, late, 0).unwrap();

        pipeline.update_information(group).unwrap();
        let info = pipeline.output_information(group, 0).unwrap();
        assert_eq!(info.get(keys::TIME_STEPS), Some(vec![0.0, 1.0, 2.0, 3.0]));
        assert_eq!(info.get(keys::TIME_RANGE), Some([0.0, 3.0]));
        assert!(!info.has(keys::WHOLE_EXTENT));

        pipeline
            .update(group, UpdateRequest::whole().with_time(2.0).unwrap())
            .unwrap();
        let output = pipeline.output(group, 0).unwrap();
        assert_eq!(output.kind(), DataKind::MultiBlock);
        assert_eq!(output.blocks().len(), 2);
        assert!(output.blocks().iter().all(|block| block.time() == Some(2.0)));
        assert_eq!(output.time(), Some(2.0));
    }

    #[test]
    fn single_connection_ports_refuse_a_second() {
        let mut pipeline = Pipeline::new();
        let extent = Extent::new(0, 1, 0, 0, 0, 0).unwrap();
        let a = pipeline.add(ImageSource::new(extent));
        let b = pipeline.add(ImageSource::new(extent));
        let group = pipeline.add(GroupDataSets::new());
        let extract = pipeline.add(crate::stages::ExtractExtent::new(extent));
        pipeline.add_input_connection(group, 0, a, 0).unwrap();
        pipeline.add_input_connection(group, 0, b, 0).unwrap();
        pipeline.add_input_connection(extract, 0, a, 0).unwrap();
        let err = pipeline.add_input_connection(extract, 0, b, 0).unwrap_err();
        assert!(err.is_configuration());
    }
}
