//! What a stage sees during each of the three passes.

use crate::data::DataObject;
use crate::error::{PipelineError, PipelineResult};
use crate::extent::UpdateRequest;
use crate::information::Information;
use crate::mtime::ModTime;
use crate::types::StageId;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between a pipeline and whoever wants
/// to stop it.  The pipeline clears it when an update starts, so it only
/// cancels the update in flight.
#[derive(Clone, Debug, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Passed to [Algorithm::request_information](crate::Algorithm::request_information).
/// Outputs arrive pre-populated with the downstream keys of the first input.
pub struct InformationContext<'a> {
    inputs: Vec<Vec<&'a Information>>,
    outputs: Vec<Information>,
    tolerance: f64,
}

impl<'a> InformationContext<'a> {
    pub(crate) fn new(inputs: Vec<Vec<&'a Information>>, outputs: Vec<Information>, tolerance: f64) -> Self {
        Self {
            inputs,
            outputs,
            tolerance,
        }
    }

    pub fn number_of_connections(&self, port: usize) -> usize {
        self.inputs.get(port).map_or(0, Vec::len)
    }

    pub fn input(&self, port: usize, connection: usize) -> Option<&'a Information> {
        self.inputs.get(port)?.get(connection).copied()
    }

    /// The input information, or a configuration error if the connection is
    /// missing.
    pub fn required_input(&self, port: usize, connection: usize) -> PipelineResult<&'a Information> {
        self.input(port, connection)
            .ok_or_else(|| PipelineError::configuration(format!("input {port}:{connection} is not connected")))
    }

    pub fn inputs(&self, port: usize) -> impl Iterator<Item = &'a Information> + '_ {
        self.inputs.get(port).into_iter().flatten().copied()
    }

    pub fn number_of_output_ports(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&self, port: usize) -> Option<&Information> {
        self.outputs.get(port)
    }

    pub fn output_mut(&mut self, port: usize) -> &mut Information {
        &mut self.outputs[port]
    }

    pub fn time_tolerance(&self) -> f64 {
        self.tolerance
    }

    pub(crate) fn into_outputs(self) -> Vec<Information> {
        self.outputs
    }
}

/// Passed to [Algorithm::request_update_extent](crate::Algorithm::request_update_extent).
///
/// Every input connection starts out asking for the request made of output
/// port 0.  A stage may change what an input asks for, or release the input
/// altogether, in which case its producer is not updated for this stage.
pub struct UpdateExtentContext<'a> {
    inputs: Vec<Vec<&'a Information>>,
    input_pipeline_mtimes: Vec<Vec<ModTime>>,
    outputs: &'a [Information],
    output_requests: &'a [Option<UpdateRequest>],
    input_requests: Vec<Vec<Option<UpdateRequest>>>,
    tolerance: f64,
}

impl<'a> UpdateExtentContext<'a> {
    pub(crate) fn new(
        inputs: Vec<Vec<&'a Information>>,
        input_pipeline_mtimes: Vec<Vec<ModTime>>,
        outputs: &'a [Information],
        output_requests: &'a [Option<UpdateRequest>],
        tolerance: f64,
    ) -> Self {
        let forwarded = output_requests.iter().flatten().next().copied();
        let input_requests = inputs
            .iter()
            .map(|connections| vec![Some(forwarded.unwrap_or_default()); connections.len()])
            .collect();
        Self {
            inputs,
            input_pipeline_mtimes,
            outputs,
            output_requests,
            input_requests,
            tolerance,
        }
    }

    pub fn number_of_connections(&self, port: usize) -> usize {
        self.inputs.get(port).map_or(0, Vec::len)
    }

    pub fn input_information(&self, port: usize, connection: usize) -> Option<&'a Information> {
        self.inputs.get(port)?.get(connection).copied()
    }

    pub fn output_information(&self, port: usize) -> Option<&'a Information> {
        self.outputs.get(port)
    }

    /// What was asked of an output port, `None` if nobody asked.
    pub fn output_request(&self, port: usize) -> Option<UpdateRequest> {
        self.output_requests.get(port).copied().flatten()
    }

    /// The first request made of any output, or the whole dataset.
    pub fn request(&self) -> UpdateRequest {
        self.output_requests.iter().flatten().next().copied().unwrap_or_default()
    }

    pub fn input_request(&self, port: usize, connection: usize) -> Option<UpdateRequest> {
        self.input_requests.get(port)?.get(connection).copied().flatten()
    }

    pub fn set_input_request(&mut self, port: usize, connection: usize, request: UpdateRequest) {
        match self.input_requests.get_mut(port).and_then(|c| c.get_mut(connection)) {
            Some(slot) => *slot = Some(request),
            None => warn!("ignoring request for unconnected input {port}:{connection}"),
        }
    }

    /// Sets the request of every connection on a port.
    pub fn set_input_requests(&mut self, port: usize, request: UpdateRequest) {
        if let Some(connections) = self.input_requests.get_mut(port) {
            connections.iter_mut().for_each(|slot| *slot = Some(request));
        }
    }

    /// The stage will not read this input during the coming data pass.
    pub fn release_input(&mut self, port: usize, connection: usize) {
        if let Some(slot) = self.input_requests.get_mut(port).and_then(|c| c.get_mut(connection)) {
            *slot = None;
        }
    }

    /// Latest modification of anything upstream of this connection.
    pub fn input_pipeline_mtime(&self, port: usize, connection: usize) -> ModTime {
        self.input_pipeline_mtimes
            .get(port)
            .and_then(|c| c.get(connection))
            .copied()
            .unwrap_or(ModTime::ZERO)
    }

    pub fn time_tolerance(&self) -> f64 {
        self.tolerance
    }

    pub(crate) fn into_input_requests(self) -> Vec<Vec<Option<UpdateRequest>>> {
        self.input_requests
    }
}

pub(crate) type ProgressObserver = dyn FnMut(StageId, f64);

/// Passed to [Algorithm::request_data](crate::Algorithm::request_data).
pub struct DataContext<'a> {
    stage: StageId,
    inputs: Vec<Vec<Option<&'a DataObject>>>,
    input_infos: Vec<Vec<&'a Information>>,
    output_infos: &'a [Information],
    requests: &'a [Option<UpdateRequest>],
    outputs: Vec<Option<DataObject>>,
    abort: &'a AbortFlag,
    progress: Option<&'a mut ProgressObserver>,
    tolerance: f64,
}

impl<'a> DataContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stage: StageId,
        inputs: Vec<Vec<Option<&'a DataObject>>>,
        input_infos: Vec<Vec<&'a Information>>,
        output_infos: &'a [Information],
        requests: &'a [Option<UpdateRequest>],
        abort: &'a AbortFlag,
        progress: Option<&'a mut ProgressObserver>,
        tolerance: f64,
    ) -> Self {
        Self {
            stage,
            inputs,
            input_infos,
            output_infos,
            requests,
            outputs: vec![None; output_infos.len()],
            abort,
            progress,
            tolerance,
        }
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    pub fn number_of_connections(&self, port: usize) -> usize {
        self.inputs.get(port).map_or(0, Vec::len)
    }

    /// Input data, `None` if the connection is missing or was released.
    pub fn input(&self, port: usize, connection: usize) -> Option<&'a DataObject> {
        self.inputs.get(port)?.get(connection).copied().flatten()
    }

    pub fn required_input(&self, port: usize, connection: usize) -> PipelineResult<&'a DataObject> {
        self.input(port, connection)
            .ok_or_else(|| PipelineError::data(format!("no data on input {port}:{connection}")))
    }

    pub fn inputs(&self, port: usize) -> impl Iterator<Item = &'a DataObject> + '_ {
        self.inputs.get(port).into_iter().flatten().filter_map(|data| *data)
    }

    pub fn input_information(&self, port: usize, connection: usize) -> Option<&'a Information> {
        self.input_infos.get(port)?.get(connection).copied()
    }

    pub fn output_information(&self, port: usize) -> Option<&'a Information> {
        self.output_infos.get(port)
    }

    /// What was asked of an output port, the whole dataset if nobody asked.
    pub fn request(&self, port: usize) -> UpdateRequest {
        self.requests.get(port).copied().flatten().unwrap_or_default()
    }

    pub fn set_output(&mut self, port: usize, data: DataObject) {
        match self.outputs.get_mut(port) {
            Some(slot) => *slot = Some(data),
            None => warn!("{} dropped output for missing port {port}", self.stage),
        }
    }

    pub fn output(&self, port: usize) -> Option<&DataObject> {
        self.outputs.get(port).and_then(Option::as_ref)
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_set()
    }

    /// `Err(Aborted)` once somebody has asked the pipeline to stop.
    pub fn check_abort(&self) -> PipelineResult<()> {
        if self.abort.is_set() {
            Err(PipelineError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Reports progress in `[0, 1]` to the pipeline's observer, if any.
    pub fn update_progress(&mut self, fraction: f64) {
        let stage = self.stage;
        if let Some(observer) = self.progress.as_deref_mut() {
            observer(stage, fraction.clamp(0.0, 1.0));
        }
    }

    pub fn time_tolerance(&self) -> f64 {
        self.tolerance
    }

    pub(crate) fn into_outputs(self) -> Vec<Option<DataObject>> {
        self.outputs
    }
}
