use super::context::{AbortFlag, DataContext, InformationContext, UpdateExtentContext};
use super::options::ExecutiveOptions;
use crate::data::DataObject;
use crate::error::{PipelineError, PipelineResult};
use crate::extent::{Extent, UpdateRequest};
use crate::information::{Information, keys};
use crate::mtime::ModTime;
use crate::translator::{ExtentTranslator, SplitMode};
use crate::types::{Algorithm, StageHandle, StageId, downcast_mut, downcast_ref};

use derive_new::new;
use log::Level;
use std::cmp::max;
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

static PIPELINE_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Connection {
    producer: StageId,
    port: usize,
}

/// A request made of one output port by a terminal consumer.
#[derive(new, Clone, Copy, Debug)]
pub struct Demand {
    pub stage: StageId,
    pub port: usize,
    pub request: UpdateRequest,
}

/// Everything the executive remembers about a stage between updates.
struct StageData {
    name: String,
    inputs: Vec<Vec<Connection>>,
    wiring_mtime: ModTime,
    output_info: Vec<Information>,
    info_valid: bool,
    info_checked: ModTime,
    info_mtime: ModTime,
    pipeline_mtime: ModTime,
    requests: Vec<Option<UpdateRequest>>,
    outputs: Vec<Option<DataObject>>,
    produced_for: Vec<Option<UpdateRequest>>,
    consumed: Vec<Vec<ModTime>>,
    executed_at: ModTime,
    execute_count: usize,
    failed_last: bool,
}

impl StageData {
    fn new(name: String, input_ports: usize, output_ports: usize) -> Self {
        Self {
            name,
            inputs: vec![Vec::new(); input_ports],
            wiring_mtime: ModTime::next(),
            output_info: vec![Information::new(); output_ports],
            info_valid: false,
            info_checked: ModTime::ZERO,
            info_mtime: ModTime::ZERO,
            pipeline_mtime: ModTime::ZERO,
            requests: vec![None; output_ports],
            outputs: vec![None; output_ports],
            produced_for: vec![None; output_ports],
            consumed: Vec::new(),
            executed_at: ModTime::ZERO,
            execute_count: 0,
            failed_last: false,
        }
    }

    fn producers(&self) -> impl Iterator<Item = usize> + '_ {
        self.inputs.iter().flatten().map(|c| c.producer.0)
    }
}

/// Book keeping for a single update.
struct Pass {
    order: Vec<usize>,
    broken: Vec<bool>,
    demanded: Vec<bool>,
    pending: Vec<Vec<Vec<UpdateRequest>>>,
    released: Vec<Vec<Vec<bool>>>,
    error: Option<PipelineError>,
}

impl Pass {
    fn is_released(&self, stage: usize, port: usize, connection: usize) -> bool {
        self.released
            .get(stage)
            .and_then(|ports| ports.get(port))
            .and_then(|conns| conns.get(connection))
            .copied()
            .unwrap_or(false)
    }

    fn into_result(self) -> PipelineResult<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Owns a graph of [Algorithm]s and executes them on demand.
///
/// A call to [Pipeline::update] walks the subgraph feeding the requested
/// stage.  Information flows down from the sources, requests flow up from
/// the consumer, and only the stages whose inputs, parameters or requests
/// changed since their last run execute again.  A failed update leaves the
/// previous outputs in place.
pub struct Pipeline {
    id: usize,
    algorithms: Vec<Box<dyn Algorithm>>,
    stages: Vec<StageData>,
    options: ExecutiveOptions,
    abort: AbortFlag,
    progress: Option<Box<dyn FnMut(StageId, f64)>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_options(ExecutiveOptions::default())
    }

    pub fn with_options(options: ExecutiveOptions) -> Self {
        Self {
            id: PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
            algorithms: Vec::new(),
            stages: Vec::new(),
            options,
            abort: AbortFlag::new(),
            progress: None,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn options(&self) -> &ExecutiveOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn add<A: Algorithm + 'static>(&mut self, algorithm: A) -> StageHandle<A> {
        let id = StageId(self.stages.len());
        let data = StageData::new(
            algorithm.type_name(),
            algorithm.number_of_input_ports(),
            algorithm.number_of_output_ports(),
        );
        self.algorithms.push(Box::new(algorithm));
        self.stages.push(data);
        StageHandle::new(id)
    }

    pub fn algorithm<A: Algorithm + 'static>(&self, handle: StageHandle<A>) -> Option<&A> {
        let algorithm = self.algorithms.get(handle.id().0)?;
        downcast_ref::<A>(algorithm.as_ref())
    }

    /// Mutable access for parameter changes.  Setters are expected to bump
    /// the stage's modification time.
    pub fn algorithm_mut<A: Algorithm + 'static>(&mut self, handle: StageHandle<A>) -> Option<&mut A> {
        let algorithm = self.algorithms.get_mut(handle.id().0)?;
        downcast_mut::<A>(algorithm.as_mut())
    }

    pub fn stage(&self, stage: impl Into<StageId>) -> Option<&dyn Algorithm> {
        self.algorithms.get(stage.into().0).map(|a| a.as_ref())
    }

    pub fn stage_name(&self, stage: impl Into<StageId>) -> Option<&str> {
        self.stages.get(stage.into().0).map(|s| s.name.as_str())
    }

    /// Connects output 0 of `producer` to input 0 of `consumer`.
    pub fn connect(&mut self, producer: impl Into<StageId>, consumer: impl Into<StageId>) -> PipelineResult<()> {
        self.set_input_connection(consumer, 0, producer, 0)
    }

    /// Replaces whatever was connected to `port`.
    pub fn set_input_connection(
        &mut self,
        consumer: impl Into<StageId>,
        port: usize,
        producer: impl Into<StageId>,
        output_port: usize,
    ) -> PipelineResult<()> {
        let (consumer, producer) = (consumer.into(), producer.into());
        self.check_connection(consumer, port, producer, output_port)?;
        let stage = &mut self.stages[consumer.0];
        stage.inputs[port] = vec![Connection {
            producer,
            port: output_port,
        }];
        stage.wiring_mtime = ModTime::next();
        Ok(())
    }

    /// Appends a connection to a repeatable port.
    pub fn add_input_connection(
        &mut self,
        consumer: impl Into<StageId>,
        port: usize,
        producer: impl Into<StageId>,
        output_port: usize,
    ) -> PipelineResult<()> {
        let (consumer, producer) = (consumer.into(), producer.into());
        self.check_connection(consumer, port, producer, output_port)?;
        let repeatable = self.algorithms[consumer.0].input_port(port).repeatable;
        let stage = &mut self.stages[consumer.0];
        if !repeatable && !stage.inputs[port].is_empty() {
            return Err(PipelineError::configuration(format!(
                "input {port} of {} takes a single connection",
                stage.name
            )));
        }
        stage.inputs[port].push(Connection {
            producer,
            port: output_port,
        });
        stage.wiring_mtime = ModTime::next();
        Ok(())
    }

    pub fn remove_input_connections(&mut self, consumer: impl Into<StageId>, port: usize) -> PipelineResult<()> {
        let consumer = consumer.into();
        let stage = self
            .stages
            .get_mut(consumer.0)
            .ok_or_else(|| PipelineError::configuration(format!("no stage {consumer}")))?;
        let connections = stage
            .inputs
            .get_mut(port)
            .ok_or_else(|| PipelineError::configuration(format!("{} has no input {port}", stage.name)))?;
        connections.clear();
        stage.wiring_mtime = ModTime::next();
        Ok(())
    }

    fn check_connection(
        &self,
        consumer: StageId,
        port: usize,
        producer: StageId,
        output_port: usize,
    ) -> PipelineResult<()> {
        if consumer == producer {
            return Err(PipelineError::configuration(format!("{consumer} cannot feed itself")));
        }
        let consumer_stage = self
            .stages
            .get(consumer.0)
            .ok_or_else(|| PipelineError::configuration(format!("no stage {consumer}")))?;
        self.check_output_port(producer, output_port)?;
        if port >= consumer_stage.inputs.len() {
            return Err(PipelineError::configuration(format!(
                "{} has {} input ports, not {port}",
                consumer_stage.name,
                consumer_stage.inputs.len()
            )));
        }
        Ok(())
    }

    fn check_output_port(&self, stage: StageId, port: usize) -> PipelineResult<()> {
        let data = self
            .stages
            .get(stage.0)
            .ok_or_else(|| PipelineError::configuration(format!("no stage {stage}")))?;
        if port >= data.outputs.len() {
            return Err(PipelineError::configuration(format!(
                "{} has {} output ports, not {port}",
                data.name,
                data.outputs.len()
            )));
        }
        Ok(())
    }

    /// Latest data produced on an output port, possibly from an earlier
    /// update if the last one failed.
    pub fn output(&self, stage: impl Into<StageId>, port: usize) -> Option<&DataObject> {
        self.stages.get(stage.into().0)?.outputs.get(port)?.as_ref()
    }

    pub fn output_information(&self, stage: impl Into<StageId>, port: usize) -> Option<&Information> {
        self.stages.get(stage.into().0)?.output_info.get(port)
    }

    /// The request most recently made of an output port.
    pub fn request(&self, stage: impl Into<StageId>, port: usize) -> Option<UpdateRequest> {
        self.stages.get(stage.into().0)?.requests.get(port).copied().flatten()
    }

    /// The request most recently made of an output port, as `UPDATE_*` keys.
    pub fn request_information(&self, stage: impl Into<StageId>, port: usize) -> Option<Information> {
        self.request(stage, port).map(|request| {
            let mut info = Information::new();
            request.write_to(&mut info);
            info
        })
    }

    /// Number of successful `request_data` calls.
    pub fn execute_count(&self, stage: impl Into<StageId>) -> usize {
        self.stages.get(stage.into().0).map_or(0, |s| s.execute_count)
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub fn set_progress_observer(&mut self, observer: impl FnMut(StageId, f64) + 'static) {
        self.progress = Some(Box::new(observer));
    }

    /// Updates output 0 of `stage`.
    pub fn update(&mut self, stage: impl Into<StageId>, request: UpdateRequest) -> PipelineResult<()> {
        self.update_port(stage, 0, request)
    }

    pub fn update_port(&mut self, stage: impl Into<StageId>, port: usize, request: UpdateRequest) -> PipelineResult<()> {
        self.update_all(&[Demand::new(stage.into(), port, request)])
    }

    /// Updates several terminal requests in a single pass, so shared
    /// upstream stages execute at most once.
    #[cfg_attr(feature = "instrument-passes", tracing::instrument(skip_all, fields(pipeline = self.id)))]
    pub fn update_all(&mut self, demands: &[Demand]) -> PipelineResult<()> {
        for demand in demands {
            self.check_output_port(demand.stage, demand.port)?;
        }
        self.abort.clear();
        let timer = Instant::now();
        let terminals: Vec<StageId> = demands.iter().map(|d| d.stage).collect();
        let mut pass = self.begin(&terminals)?;
        self.information_pass(&mut pass);
        self.update_extent_pass(&mut pass, demands);
        self.execute_pass(&mut pass);
        debug!(
            "pipeline {:?}, update of {:?} stages took {:?}",
            self.id,
            pass.order.len(),
            timer.elapsed()
        );
        pass.into_result()
    }

    /// Runs the information pass alone.
    pub fn update_information(&mut self, stage: impl Into<StageId>) -> PipelineResult<()> {
        let mut pass = self.begin(&[stage.into()])?;
        self.information_pass(&mut pass);
        pass.into_result()
    }

    fn begin(&self, terminals: &[StageId]) -> PipelineResult<Pass> {
        let order = self.collect(terminals)?;
        let n = self.stages.len();
        Ok(Pass {
            order,
            broken: vec![false; n],
            demanded: vec![false; n],
            pending: self.stages.iter().map(|s| vec![Vec::new(); s.outputs.len()]).collect(),
            released: self
                .stages
                .iter()
                .map(|s| s.inputs.iter().map(|c| vec![false; c.len()]).collect())
                .collect(),
            error: None,
        })
    }

    /// The stages feeding `terminals`, producers before consumers.
    fn collect(&self, terminals: &[StageId]) -> PipelineResult<Vec<usize>> {
        let mut marks = vec![Mark::Unvisited; self.stages.len()];
        let mut order = Vec::new();
        for terminal in terminals {
            if terminal.0 >= self.stages.len() {
                return Err(PipelineError::configuration(format!("no stage {terminal}")));
            }
            self.visit(terminal.0, &mut marks, &mut order)?;
        }
        Ok(order)
    }

    fn visit(&self, index: usize, marks: &mut [Mark], order: &mut Vec<usize>) -> PipelineResult<()> {
        // recursively crawl upstream, pushing each stage after its producers
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::Visiting => {
                return Err(PipelineError::configuration(format!(
                    "cycle through {} {}",
                    self.stages[index].name,
                    StageId(index)
                )));
            }
            Mark::Unvisited => {}
        }
        marks[index] = Mark::Visiting;
        for producer in self.stages[index].producers() {
            self.visit(producer, marks, order)?;
        }
        marks[index] = Mark::Done;
        order.push(index);
        Ok(())
    }

    fn stage_mtime(&self, index: usize) -> ModTime {
        max(self.algorithms[index].mtime(), self.stages[index].wiring_mtime)
    }

    fn fail(&self, pass: &mut Pass, index: usize, err: PipelineError, phase: &str) {
        let err = err.in_stage(&self.stages[index].name);
        if err.is_aborted() {
            self.log(index, Level::Warn, &format!("{phase} aborted, keeping previous output"));
        } else {
            self.log(index, Level::Error, &format!("{phase} failed: {err}"));
        }
        pass.broken[index] = true;
        if pass.error.is_none() {
            pass.error = Some(err);
        }
    }

    fn log(&self, index: usize, level: Level, msg: &str) {
        if log_enabled!(level) {
            let id = self.id;
            let type_name = self.stages[index].name.as_str();
            log!(target: type_name, level, "[{id:},{index:}]{msg:}");
        }
    }

    // information

    #[cfg_attr(feature = "instrument-passes", tracing::instrument(skip_all, fields(pipeline = self.id)))]
    fn information_pass(&mut self, pass: &mut Pass) {
        let timer = Instant::now();
        let mut ran = 0;
        for i in 0..pass.order.len() {
            let index = pass.order[i];
            if self.stages[index].producers().any(|p| pass.broken[p]) {
                pass.broken[index] = true;
                continue;
            }
            let stage_mtime = self.stage_mtime(index);
            let upstream = self.stages[index]
                .producers()
                .map(|p| self.stages[p].pipeline_mtime)
                .max()
                .unwrap_or(ModTime::ZERO);
            self.stages[index].pipeline_mtime = max(stage_mtime, upstream);
            let stage = &self.stages[index];
            let current = stage.info_valid
                && stage_mtime <= stage.info_checked
                && stage.producers().all(|p| self.stages[p].info_mtime <= stage.info_checked);
            if current {
                continue;
            }
            ran += 1;
            if let Err(err) = self.run_information(index) {
                self.stages[index].info_valid = false;
                self.fail(pass, index, err, "request_information");
            }
        }
        debug!(
            "pipeline {:?}, information pass ran {:?} of {:?} stages in {:?}",
            self.id,
            ran,
            pass.order.len(),
            timer.elapsed()
        );
    }

    fn run_information(&mut self, index: usize) -> PipelineResult<()> {
        let algorithm = &mut self.algorithms[index];
        let stages = &self.stages;
        let stage = &stages[index];
        for port in 0..stage.inputs.len() {
            if stage.inputs[port].is_empty() && !algorithm.input_port(port).optional {
                return Err(PipelineError::configuration(format!(
                    "required input {port} is not connected"
                )));
            }
        }
        let inputs: Vec<Vec<&Information>> = stage
            .inputs
            .iter()
            .map(|conns| conns.iter().map(|c| &stages[c.producer.0].output_info[c.port]).collect())
            .collect();
        let mut seed = Information::new();
        if let Some(first) = inputs.first().and_then(|conns| conns.first()) {
            seed.copy_entries_from(first, keys::DOWNSTREAM_KEYS);
        }
        let outputs = vec![seed; stage.outputs.len()];
        let mut ctx = InformationContext::new(inputs, outputs, self.options.time_tolerance);
        algorithm.request_information(&mut ctx)?;
        let mut outputs = ctx.into_outputs();
        for info in outputs.iter_mut() {
            if !info.has(keys::PRODUCER) {
                info.set(keys::PRODUCER, algorithm.type_name());
            }
        }
        let stage = &mut self.stages[index];
        if stage.output_info != outputs {
            stage.output_info = outputs;
            stage.info_mtime = ModTime::next();
        }
        stage.info_checked = ModTime::next();
        stage.info_valid = true;
        Ok(())
    }

    // update extent

    #[cfg_attr(feature = "instrument-passes", tracing::instrument(skip_all, fields(pipeline = self.id)))]
    fn update_extent_pass(&mut self, pass: &mut Pass, demands: &[Demand]) {
        let timer = Instant::now();
        for demand in demands {
            pass.pending[demand.stage.0][demand.port].push(demand.request);
        }
        for i in (0..pass.order.len()).rev() {
            let index = pass.order[i];
            if pass.broken[index] || pass.pending[index].iter().all(Vec::is_empty) {
                continue;
            }
            match self.request_update_extent(index, pass) {
                Ok(()) => pass.demanded[index] = true,
                Err(err) => self.fail(pass, index, err, "request_update_extent"),
            }
        }
        debug!(
            "pipeline {:?}, update extent pass took {:?}",
            self.id,
            timer.elapsed()
        );
    }

    fn request_update_extent(&mut self, index: usize, pass: &mut Pass) -> PipelineResult<()> {
        let tolerance = self.options.time_tolerance;
        let mut requests = Vec::with_capacity(pass.pending[index].len());
        for (port, pending) in pass.pending[index].iter().enumerate() {
            let Some((first, rest)) = pending.split_first() else {
                requests.push(None);
                continue;
            };
            let info = &self.stages[index].output_info[port];
            let mut merged = self.translate_piece(info, *first)?;
            for request in rest {
                merged = merged.union_with_tolerance(&self.translate_piece(info, *request)?, tolerance)?;
            }
            let normalised = self.normalise(info, merged)?;
            requests.push(Some(normalised));
        }
        self.stages[index].requests = requests;
        for (port, request) in self.stages[index].requests.iter().enumerate() {
            if let Some(request) = request {
                self.log(index, Level::Trace, &format!("port {port} asked for {request}"));
            }
        }

        let algorithm = &mut self.algorithms[index];
        let stages = &self.stages;
        let stage = &stages[index];
        let inputs = stage
            .inputs
            .iter()
            .map(|conns| conns.iter().map(|c| &stages[c.producer.0].output_info[c.port]).collect())
            .collect();
        let mtimes = stage
            .inputs
            .iter()
            .map(|conns| conns.iter().map(|c| stages[c.producer.0].pipeline_mtime).collect())
            .collect();
        let mut ctx = UpdateExtentContext::new(inputs, mtimes, &stage.output_info, &stage.requests, tolerance);
        algorithm.request_update_extent(&mut ctx)?;
        let input_requests = ctx.into_input_requests();
        for (port, conns) in stage.inputs.iter().enumerate() {
            for (connection, conn) in conns.iter().enumerate() {
                match input_requests[port][connection] {
                    Some(request) => pass.pending[conn.producer.0][conn.port].push(request),
                    None => pass.released[index][port][connection] = true,
                }
            }
        }
        Ok(())
    }

    /// Validates a request against the producer's information: translates
    /// pieces into structured extents and clips to the whole extent.
    fn normalise(&self, info: &Information, request: UpdateRequest) -> PipelineResult<UpdateRequest> {
        let mut request = self.translate_piece(info, request)?;
        let whole = match info.get(keys::WHOLE_EXTENT) {
            Some(bounds) => Extent::from_array(bounds)?,
            None => return Ok(request),
        };
        if self.options.clip_update_extent {
            if let Some(extent) = request.extent {
                let clipped = extent
                    .clip(&whole)
                    .ok_or_else(|| PipelineError::InvalidExtent(format!("{extent} lies outside {whole}")))?;
                request.extent = Some(clipped);
            }
        }
        Ok(request)
    }

    /// Gives a piece request the structured extent of its piece, unless the
    /// producer handles pieces itself.  Sibling requests are translated before
    /// their union so the union covers every piece's points.
    fn translate_piece(&self, info: &Information, request: UpdateRequest) -> PipelineResult<UpdateRequest> {
        let mut request = request;
        let translate = !info.get(keys::CAN_HANDLE_PIECE_REQUEST).unwrap_or(false);
        let (None, Some(piece), true) = (request.extent, request.piece, translate) else {
            return Ok(request);
        };
        let Some(bounds) = info.get(keys::WHOLE_EXTENT) else {
            return Ok(request);
        };
        let whole = Extent::from_array(bounds)?;
        let mode = info
            .get(keys::SPLIT_MODE)
            .and_then(|mode| SplitMode::from_str(&mode).ok())
            .unwrap_or_default();
        let extent = ExtentTranslator::new(mode)
            .ghosted_extent(&whole, &piece)
            .ok_or_else(|| PipelineError::InvalidExtent(format!("{piece} of {whole} is empty")))?;
        request.extent = Some(extent);
        Ok(request)
    }

    // execute

    #[cfg_attr(feature = "instrument-passes", tracing::instrument(skip_all, fields(pipeline = self.id)))]
    fn execute_pass(&mut self, pass: &mut Pass) {
        let timer = Instant::now();
        let mut ran = 0;
        for i in 0..pass.order.len() {
            let index = pass.order[i];
            if pass.broken[index] || !pass.demanded[index] {
                continue;
            }
            let upstream_failed = self.stages[index].inputs.iter().enumerate().any(|(port, conns)| {
                conns
                    .iter()
                    .enumerate()
                    .any(|(c, conn)| !pass.is_released(index, port, c) && pass.broken[conn.producer.0])
            });
            if upstream_failed {
                pass.broken[index] = true;
                self.log(index, Level::Warn, "skipped, an upstream stage failed");
                continue;
            }
            let stamps = self.input_stamps(index, pass);
            match self.execute_reason(index, &stamps) {
                None => {
                    self.log(index, Level::Debug, "up to date");
                    continue;
                }
                Some(reason) => self.log(index, Level::Debug, &format!("executing, {reason}")),
            }
            ran += 1;
            match self.request_data(index, pass) {
                Ok(outputs) => self.commit(index, outputs, stamps),
                Err(err) => {
                    self.stages[index].failed_last = true;
                    self.fail(pass, index, err, "request_data");
                }
            }
        }
        debug!(
            "pipeline {:?}, execute pass ran {:?} of {:?} stages in {:?}",
            self.id,
            ran,
            pass.order.len(),
            timer.elapsed()
        );
    }

    /// A released connection keeps the stamp consumed last time, so skipping
    /// upstream work never counts as an input change.
    fn input_stamps(&self, index: usize, pass: &Pass) -> Vec<Vec<ModTime>> {
        let stage = &self.stages[index];
        stage
            .inputs
            .iter()
            .enumerate()
            .map(|(port, conns)| {
                conns
                    .iter()
                    .enumerate()
                    .map(|(c, conn)| {
                        if pass.is_released(index, port, c) {
                            stage
                                .consumed
                                .get(port)
                                .and_then(|row| row.get(c))
                                .copied()
                                .unwrap_or(ModTime::ZERO)
                        } else {
                            self.stages[conn.producer.0].outputs[conn.port]
                                .as_ref()
                                .map_or(ModTime::ZERO, DataObject::mtime)
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn execute_reason(&self, index: usize, stamps: &[Vec<ModTime>]) -> Option<&'static str> {
        let stage = &self.stages[index];
        if stage.execute_count == 0 {
            Some("first update")
        } else if stage.failed_last {
            Some("last attempt failed")
        } else if self.stage_mtime(index) > stage.executed_at {
            Some("stage modified")
        } else if stage.consumed != stamps {
            Some("input data changed")
        } else if stage.produced_for != stage.requests {
            Some("request changed")
        } else {
            None
        }
    }

    #[cfg_attr(feature = "instrument-stage", tracing::instrument(skip_all, fields(stage = index)))]
    fn request_data(&mut self, index: usize, pass: &Pass) -> PipelineResult<Vec<Option<DataObject>>> {
        let algorithm = &mut self.algorithms[index];
        let stages = &self.stages;
        let stage = &stages[index];
        let mut inputs = Vec::with_capacity(stage.inputs.len());
        for (port, conns) in stage.inputs.iter().enumerate() {
            let constraint = algorithm.input_port(port);
            let mut row = Vec::with_capacity(conns.len());
            for (c, conn) in conns.iter().enumerate() {
                if pass.is_released(index, port, c) {
                    row.push(None);
                    continue;
                }
                let data = stages[conn.producer.0].outputs[conn.port].as_ref();
                if let Some(data) = data {
                    if self.options.check_input_kinds && !constraint.accepts(data.kind()) {
                        return Err(PipelineError::data(format!(
                            "input {port}:{c} holds {} but accepts {:?}",
                            data.kind(),
                            constraint.kinds
                        )));
                    }
                }
                row.push(data);
            }
            inputs.push(row);
        }
        let input_infos = stage
            .inputs
            .iter()
            .map(|conns| conns.iter().map(|c| &stages[c.producer.0].output_info[c.port]).collect())
            .collect();
        let mut ctx = DataContext::new(
            StageId(index),
            inputs,
            input_infos,
            &stage.output_info,
            &stage.requests,
            &self.abort,
            self.progress.as_deref_mut(),
            self.options.time_tolerance,
        );
        algorithm.request_data(&mut ctx)?;
        Ok(ctx.into_outputs())
    }

    fn commit(&mut self, index: usize, outputs: Vec<Option<DataObject>>, stamps: Vec<Vec<ModTime>>) {
        let crop = self.options.crop_exact_extents;
        let mut cropped = Vec::new();
        let stage = &mut self.stages[index];
        for (port, data) in outputs.into_iter().enumerate() {
            let data = data.map(|mut data| {
                if let Some(request) = stage.requests[port].filter(|r| r.exact && crop) {
                    if let (Some(wanted), Some(have)) = (request.extent, data.extent()) {
                        if wanted != have {
                            if let Some(exact) = data.cropped(&wanted) {
                                cropped.push(port);
                                data = exact;
                            }
                        }
                    }
                }
                data.set_mtime(ModTime::next());
                data
            });
            stage.outputs[port] = data;
        }
        stage.produced_for = stage.requests.clone();
        stage.consumed = stamps;
        stage.executed_at = ModTime::next();
        stage.execute_count += 1;
        stage.failed_last = false;
        for port in cropped {
            self.log(index, Level::Debug, &format!("cropped port {port} to the exact request"));
        }
    }

    // diagnostics

    fn layers(&self) -> Vec<usize> {
        let all: Vec<StageId> = (0..self.stages.len()).map(StageId).collect();
        let mut layers = vec![0; self.stages.len()];
        if let Ok(order) = self.collect(&all) {
            for index in order {
                layers[index] = self.stages[index]
                    .producers()
                    .map(|p| layers[p] + 1)
                    .max()
                    .unwrap_or(0);
            }
        }
        layers
    }

    pub fn print(&mut self) -> &mut Pipeline {
        let layers = self.layers();
        for (i, stage) in self.stages.iter().enumerate() {
            print!("[{i:02}] ");
            for _ in 0..layers[i] {
                print!("   ");
            }
            println!("{:}", stage.name);
        }
        self
    }

    /// Writes the graph in GML.
    pub fn export(&self, path: &str) -> Result<(), Error> {
        let path = Path::new(&path);
        let mut output = File::create(path)?;
        writeln!(output, "graph [")?;
        writeln!(output, "    directed 1")?;
        for (i, stage) in self.stages.iter().enumerate() {
            writeln!(output, "    node [")?;
            writeln!(output, "        id {i}")?;
            writeln!(output, "        label \"[{i}] {}\"", stage.name)?;
            writeln!(output, "    ]")?;
        }
        for (i, stage) in self.stages.iter().enumerate() {
            for (port, conns) in stage.inputs.iter().enumerate() {
                for conn in conns {
                    writeln!(output, "    edge [")?;
                    writeln!(output, "        source {}", conn.producer.0)?;
                    writeln!(output, "        target {i}")?;
                    writeln!(output, "        label \"{}:{port}\"", conn.port)?;
                    writeln!(output, "    ]")?;
                }
            }
        }
        writeln!(output, "]")
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::executive::DataContext;
    use crate::mtime::MTime;
    use crate::stages::{ImageSource, TemporalShiftScale, TemporalSource};
    use crate::types::StageHandle;

    use std::cell::RefCell;
    use std::rc::Rc;

    struct Scale {
        factor: f64,
        fail: bool,
        mtime: MTime,
    }

    impl Scale {
        fn new(factor: f64) -> Self {
            Self {
                factor,
                fail: false,
                mtime: MTime::new(),
            }
        }

        fn set_fail(&mut self, fail: bool) {
            self.fail = fail;
            self.mtime.modified();
        }
    }

    impl Algorithm for Scale {
        fn mtime(&self) -> ModTime {
            self.mtime.get()
        }

        fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
            if self.fail {
                return Err(PipelineError::data("asked to fail"));
            }
            let mut data = ctx.required_input(0, 0)?.clone();
            data.values_mut().iter_mut().for_each(|v| *v *= self.factor);
            ctx.set_output(0, data);
            Ok(())
        }
    }

    fn ext(bounds: [i64; 6]) -> Extent {
        Extent::from_array(bounds).unwrap()
    }

    fn chain(pipeline: &mut Pipeline) -> (StageHandle<ImageSource>, StageHandle<Scale>, StageHandle<Scale>) {
        let source = pipeline.add(ImageSource::new(ext([0, 3, 0, 3, 0, 3])));
        let scale = pipeline.add(Scale::new(2.0));
        let tail = pipeline.add(Scale::new(-1.0));
        pipeline.connect(source, scale).unwrap();
        pipeline.connect(scale, tail).unwrap();
        (source, scale, tail)
    }

    #[test]
    fn repeated_updates_do_not_execute() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut pipeline = Pipeline::new();
        let (source, scale, tail) = chain(&mut pipeline);
        pipeline.update(tail, UpdateRequest::whole()).unwrap();
        pipeline.update(tail, UpdateRequest::whole()).unwrap();
        assert_eq!(pipeline.execute_count(source), 1);
        assert_eq!(pipeline.execute_count(tail), 1);

        // touching the middle re-runs it and everything downstream only
        pipeline.algorithm_mut(scale).unwrap().set_fail(false);
        pipeline.update(tail, UpdateRequest::whole()).unwrap();
        assert_eq!(pipeline.execute_count(source), 1);
        assert_eq!(pipeline.execute_count(scale), 2);
        assert_eq!(pipeline.execute_count(tail), 2);
        assert_eq!(pipeline.output(tail, 0).unwrap().value_at([1, 1, 1]), Some(-20202.0));
    }

    #[test]
    fn shared_producer_executes_once_for_siblings() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 3, 0, 3, 0, 0])));
        let a = pipeline.add(Scale::new(2.0));
        let b = pipeline.add(Scale::new(3.0));
        pipeline.connect(source, a).unwrap();
        pipeline.connect(source, b).unwrap();
        let left = UpdateRequest::whole().with_extent(ext([0, 1, 0, 3, 0, 0]));
        let right = UpdateRequest::whole().with_extent(ext([2, 3, 0, 3, 0, 0]));
        pipeline
            .update_all(&[Demand::new(a.id(), 0, left), Demand::new(b.id(), 0, right)])
            .unwrap();
        assert_eq!(pipeline.execute_count(source), 1);
        assert_eq!(pipeline.request(source, 0).and_then(|r| r.extent), Some(ext([0, 3, 0, 3, 0, 0])));
        assert_eq!(pipeline.output(b, 0).unwrap().value_at([3, 3, 0]), Some(909.0));
    }

    #[test]
    fn sibling_ghost_levels_execute_once_at_the_union() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 9, 0, 9, 0, 0])));
        let a = pipeline.add(Scale::new(2.0));
        let b = pipeline.add(Scale::new(3.0));
        pipeline.connect(source, a).unwrap();
        pipeline.connect(source, b).unwrap();
        let bare = UpdateRequest::whole().with_piece(0, 2, 0).unwrap();
        let ghosted = UpdateRequest::whole().with_piece(0, 2, 2).unwrap();
        pipeline
            .update_all(&[Demand::new(a.id(), 0, bare), Demand::new(b.id(), 0, ghosted)])
            .unwrap();
        assert_eq!(pipeline.execute_count(source), 1);
        let request = pipeline.request(source, 0).unwrap();
        assert_eq!(request.ghost_levels(), 2);
        assert_eq!(request.extent, Some(ext([0, 9, 0, 6, 0, 0])));
    }

    #[test]
    fn piece_and_extent_siblings_cover_both() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 9, 0, 9, 0, 0])));
        let a = pipeline.add(Scale::new(2.0));
        let b = pipeline.add(Scale::new(3.0));
        pipeline.connect(source, a).unwrap();
        pipeline.connect(source, b).unwrap();
        // piece 0 of 2 is [0,9,0,4], the explicit extent lies in piece 1
        let explicit = UpdateRequest::whole()
            .with_extent(ext([0, 2, 7, 9, 0, 0]))
            .with_piece(0, 2, 0)
            .unwrap();
        let piece = UpdateRequest::whole().with_piece(0, 2, 0).unwrap();
        pipeline
            .update_all(&[Demand::new(a.id(), 0, explicit), Demand::new(b.id(), 0, piece)])
            .unwrap();
        assert_eq!(pipeline.execute_count(source), 1);
        let produced = pipeline.output(source, 0).unwrap().extent().unwrap();
        assert!(produced.contains(&ext([0, 2, 7, 9, 0, 0])));
        assert!(produced.contains(&ext([0, 9, 0, 4, 0, 0])));
    }

    #[test]
    fn information_is_stable_across_touches() {
        let mut pipeline = Pipeline::new();
        let (source, _, tail) = chain(&mut pipeline);
        pipeline.update_information(tail).unwrap();
        let before = pipeline.output_information(tail, 0).unwrap().to_bytes();
        pipeline.algorithm_mut(source).unwrap().set_origin([0.0; 3]);
        pipeline.update_information(tail).unwrap();
        let after = pipeline.output_information(tail, 0).unwrap().to_bytes();
        assert_eq!(before, after);
    }

    #[test]
    fn failure_keeps_previous_outputs() {
        let mut pipeline = Pipeline::new();
        let (_, scale, tail) = chain(&mut pipeline);
        pipeline.update(tail, UpdateRequest::whole()).unwrap();
        let kept = pipeline.output(scale, 0).unwrap().payload().clone();

        pipeline.algorithm_mut(scale).unwrap().set_fail(true);
        let err = pipeline.update(tail, UpdateRequest::whole()).unwrap_err();
        assert_eq!(err.stage(), Some("Scale"));
        assert!(matches!(err.root(), PipelineError::Data(_)));
        assert!(pipeline.output(scale, 0).unwrap().payload().ptr_eq(&kept));
        assert_eq!(pipeline.execute_count(tail), 1);

        pipeline.algorithm_mut(scale).unwrap().set_fail(false);
        pipeline.update(tail, UpdateRequest::whole()).unwrap();
        assert_eq!(pipeline.execute_count(scale), 2);
        assert_eq!(pipeline.execute_count(tail), 2);
    }

    #[test]
    fn abort_keeps_previous_outputs() {
        let mut pipeline = Pipeline::new();
        let (source, _, tail) = chain(&mut pipeline);
        pipeline.update(tail, UpdateRequest::whole()).unwrap();
        let kept = pipeline.output(source, 0).unwrap().payload().clone();

        let flag = pipeline.abort_flag();
        pipeline.set_progress_observer(move |_, _| flag.abort());
        pipeline.algorithm_mut(source).unwrap().set_origin([1.0, 0.0, 0.0]);
        let err = pipeline.update(tail, UpdateRequest::whole()).unwrap_err();
        assert!(err.is_aborted());
        assert!(pipeline.output(source, 0).unwrap().payload().ptr_eq(&kept));
        assert_eq!(pipeline.execute_count(tail), 1);

        // the flag is cleared when the next update starts
        pipeline.set_progress_observer(|_, _| {});
        pipeline.update(tail, UpdateRequest::whole()).unwrap();
        assert_eq!(pipeline.execute_count(source), 2);
    }

    #[test]
    fn progress_is_reported_per_slab() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 1, 0, 1, 0, 3])));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        pipeline.set_progress_observer(move |stage, fraction| sink.borrow_mut().push((stage, fraction)));
        pipeline.update(source, UpdateRequest::whole()).unwrap();
        let seen = seen.borrow();
        let fractions: Vec<f64> = seen.iter().map(|(_, f)| *f).collect();
        assert_eq!(fractions, vec![0.25, 0.5, 0.75, 1.0]);
        assert!(seen.iter().all(|(stage, _)| *stage == source.id()));
    }

    #[test]
    fn consumers_cannot_modify_producer_output() {
        let mut pipeline = Pipeline::new();
        let (source, scale, _) = chain(&mut pipeline);
        pipeline.update(scale, UpdateRequest::whole()).unwrap();
        assert_eq!(pipeline.output(source, 0).unwrap().value_at([1, 1, 1]), Some(10101.0));
        assert_eq!(pipeline.output(scale, 0).unwrap().value_at([1, 1, 1]), Some(20202.0));
        assert!(!pipeline
            .output(scale, 0)
            .unwrap()
            .payload()
            .ptr_eq(pipeline.output(source, 0).unwrap().payload()));
    }

    #[test]
    fn unconnected_required_input() {
        let mut pipeline = Pipeline::new();
        let scale = pipeline.add(Scale::new(1.0));
        let err = pipeline.update(scale, UpdateRequest::whole()).unwrap_err();
        assert!(err.is_configuration());
        assert!(pipeline.output(scale, 0).is_none());
    }

    #[test]
    fn cycles_are_rejected() {
        let mut pipeline = Pipeline::new();
        let a = pipeline.add(Scale::new(1.0));
        let b = pipeline.add(Scale::new(1.0));
        pipeline.connect(a, b).unwrap();
        pipeline.connect(b, a).unwrap();
        let err = pipeline.update(b, UpdateRequest::whole()).unwrap_err();
        assert!(err.is_configuration());
        assert!(pipeline.connect(a, a).is_err());
        assert_eq!(pipeline.execute_count(a), 0);
    }

    #[test]
    fn bad_ports_are_configuration_errors() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 1, 0, 1, 0, 0])));
        let scale = pipeline.add(Scale::new(1.0));
        assert!(pipeline.set_input_connection(scale, 1, source, 0).is_err());
        assert!(pipeline.set_input_connection(scale, 0, source, 1).is_err());
        assert!(pipeline.update_port(source, 1, UpdateRequest::whole()).unwrap_err().is_configuration());
    }

    #[test]
    fn exact_requests_are_cropped() {
        let whole = ext([0, 9, 0, 9, 0, 0]);
        let sub = ext([2, 4, 3, 5, 0, 0]);
        let request = UpdateRequest::whole().with_extent(sub).with_exact(true);

        let mut pipeline = Pipeline::new();
        let mut source = ImageSource::new(whole);
        source.set_always_whole(true);
        let source = pipeline.add(source);
        pipeline.update(source, request).unwrap();
        let data = pipeline.output(source, 0).unwrap();
        assert_eq!(data.extent(), Some(sub));
        assert_eq!(data.value_at([4, 5, 0]), Some(504.0));

        let options = ExecutiveOptions::from_json(r#"{"crop_exact_extents": false}"#).unwrap();
        let mut pipeline = Pipeline::with_options(options);
        let mut source = ImageSource::new(whole);
        source.set_always_whole(true);
        let source = pipeline.add(source);
        pipeline.update(source, request).unwrap();
        assert_eq!(pipeline.output(source, 0).unwrap().extent(), Some(whole));
    }

    #[test]
    fn requests_are_clipped_or_rejected() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add(ImageSource::new(ext([0, 9, 0, 9, 0, 0])));
        pipeline
            .update(source, UpdateRequest::whole().with_extent(ext([5, 20, -3, 2, 0, 0])))
            .unwrap();
        assert_eq!(pipeline.output(source, 0).unwrap().extent(), Some(ext([5, 9, 0, 2, 0, 0])));
        let info = pipeline.request_information(source, 0).unwrap();
        assert_eq!(info.get(keys::UPDATE_EXTENT), Some([5, 9, 0, 2, 0, 0]));
        assert_eq!(info.get(keys::EXACT_EXTENT), Some(false));

        let err = pipeline
            .update(source, UpdateRequest::whole().with_extent(ext([20, 30, 0, 0, 0, 0])))
            .unwrap_err();
        assert!(matches!(err.root(), PipelineError::InvalidExtent(_)));
        assert_eq!(pipeline.output(source, 0).unwrap().extent(), Some(ext([5, 9, 0, 2, 0, 0])));
    }

    #[test]
    fn incompatible_sibling_times() {
        let mut pipeline = Pipeline::new();
        let mut source = TemporalSource::new(ext([0, 1, 0, 0, 0, 0]));
        source.set_time_step_range(0, 9);
        let source = pipeline.add(source);
        let a = pipeline.add(TemporalShiftScale::new(0.0, 1.0, 0.0));
        let b = pipeline.add(TemporalShiftScale::new(0.0, 1.0, 1.0));
        pipeline.connect(source, a).unwrap();
        pipeline.connect(source, b).unwrap();
        let at = UpdateRequest::whole().with_time(3.0).unwrap();
        let err = pipeline
            .update_all(&[Demand::new(a.id(), 0, at), Demand::new(b.id(), 0, at)])
            .unwrap_err();
        assert!(matches!(err.root(), PipelineError::IncompatibleRequests(_)));
        assert_eq!(pipeline.execute_count(source), 0);
        assert_eq!(pipeline.execute_count(a), 0);

        // each on its own is fine
        pipeline.update(a, at).unwrap();
        pipeline.update(b, at).unwrap();
        assert_eq!(pipeline.output(b, 0).unwrap().time(), Some(3.0));
        assert_eq!(pipeline.output(source, 0).unwrap().time(), Some(2.0));
    }

    #[test]
    fn rewiring_reexecutes() {
        let mut pipeline = Pipeline::new();
        let first = pipeline.add(ImageSource::new(ext([0, 1, 0, 0, 0, 0])));
        let mut other = ImageSource::new(ext([0, 1, 0, 0, 0, 0]));
        other.set_function(|_| 7.0);
        let second = pipeline.add(other);
        let scale = pipeline.add(Scale::new(1.0));
        pipeline.connect(first, scale).unwrap();
        pipeline.update(scale, UpdateRequest::whole()).unwrap();
        pipeline.connect(second, scale).unwrap();
        pipeline.update(scale, UpdateRequest::whole()).unwrap();
        assert_eq!(pipeline.execute_count(scale), 2);
        assert_eq!(pipeline.output(scale, 0).unwrap().values(), &[7.0, 7.0]);
        pipeline.remove_input_connections(scale, 0).unwrap();
        assert!(pipeline.update(scale, UpdateRequest::whole()).unwrap_err().is_configuration());
    }

    #[test]
    fn print_and_export() {
        let mut pipeline = Pipeline::new();
        let (_, _, tail) = chain(&mut pipeline);
        assert_eq!(pipeline.print().len(), 3);
        assert_eq!(pipeline.stage_name(tail), Some("Scale"));
        assert_eq!(pipeline.stage(tail).map(|s| s.to_string()).as_deref(), Some("Scale"));
        let path = std::env::temp_dir().join(format!("vizpipe_export_{}.gml", pipeline.id()));
        let path = path.to_str().unwrap();
        pipeline.export(path).unwrap();
        let gml = std::fs::read_to_string(path).unwrap();
        assert!(gml.contains("directed 1"));
        assert!(gml.contains("label \"[0] ImageSource\""));
        assert_eq!(gml.matches("edge [").count(), 2);
        std::fs::remove_file(path).unwrap();
    }
}
