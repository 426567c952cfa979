use crate::controller::Controller;
use crate::data::{DataKind, DataObject};
use crate::error::{PipelineError, PipelineResult};
use crate::executive::{DataContext, UpdateExtentContext};
use crate::extent::{Extent, PieceExtent, UpdateRequest};
use crate::information::keys;
use crate::mtime::{MTime, ModTime};
use crate::translator::{ExtentTranslator, SplitMode};
use crate::types::{Algorithm, InputPort};

use std::rc::Rc;
use std::str::FromStr;

const GHOST_TAG: u32 = 0x6768;

/// Builds ghost layers itself instead of asking upstream for them.  The
/// input is requested without ghosts; the missing layers are exchanged with
/// the processes holding the neighbouring pieces.  Piece `p` must live on
/// process `p`.
pub struct GhostCellGenerator {
    controller: Rc<dyn Controller>,
    mtime: MTime,
}

impl GhostCellGenerator {
    pub fn new(controller: Rc<dyn Controller>) -> Self {
        Self {
            controller,
            mtime: MTime::new(),
        }
    }

    fn exchange(
        &self,
        input: &DataObject,
        translator: &ExtentTranslator,
        whole: &Extent,
        piece: &PieceExtent,
        target: &Extent,
    ) -> PipelineResult<Vec<(Extent, Vec<f64>)>> {
        let own = input
            .extent()
            .ok_or_else(|| PipelineError::data("input has no extent"))?;
        let rank = piece.piece() as usize;
        let mut received = Vec::new();
        for remote in 0..piece.pieces() as usize {
            if remote == rank {
                continue;
            }
            let theirs = translator.piece_extent(whole, remote as u32, piece.pieces());
            let their_piece = PieceExtent::new(remote as u32, piece.pieces(), piece.ghost_levels())?;
            let their_target = translator.ghosted_extent(whole, &their_piece);
            let outgoing = their_target.and_then(|t| own.intersection(&t));
            let incoming = theirs.and_then(|t| t.intersection(target));
            let values: Vec<f64> = outgoing
                .iter()
                .flat_map(|extent| extent.points())
                .filter_map(|point| input.value_at(point))
                .collect();
            // lower rank talks first
            let answer = if rank < remote {
                self.controller.send(&values, remote, GHOST_TAG)?;
                self.controller.receive(remote, GHOST_TAG)?
            } else {
                let answer = self.controller.receive(remote, GHOST_TAG)?;
                self.controller.send(&values, remote, GHOST_TAG)?;
                answer
            };
            let expected = incoming.map_or(0, |extent| extent.number_of_points());
            if answer.len() != expected {
                return Err(PipelineError::Communication(format!(
                    "expected {expected} values from {remote}, got {}",
                    answer.len()
                )));
            }
            if let Some(extent) = incoming {
                received.push((extent, answer));
            }
        }
        Ok(received)
    }
}

impl Algorithm for GhostCellGenerator {
    fn input_port(&self, _port: usize) -> InputPort {
        InputPort::accepting(&[DataKind::ImageData, DataKind::RectilinearGrid])
    }

    fn mtime(&self) -> ModTime {
        self.mtime.get()
    }

    fn request_update_extent(&mut self, ctx: &mut UpdateExtentContext) -> PipelineResult<()> {
        let request = ctx.request();
        if let Some(piece) = request.piece {
            let upstream = UpdateRequest {
                extent: None,
                piece: Some(piece.with_ghost_levels(0)),
                time: request.time,
                exact: false,
            };
            ctx.set_input_request(0, 0, upstream);
        }
        Ok(())
    }

    fn request_data(&mut self, ctx: &mut DataContext) -> PipelineResult<()> {
        let request = ctx.request(0);
        let input = ctx.required_input(0, 0)?;
        let piece = match request.piece {
            Some(piece) if piece.ghost_levels() > 0 && piece.pieces() > 1 => piece,
            _ => {
                ctx.set_output(0, input.clone());
                return Ok(());
            }
        };
        let processes = self.controller.number_of_processes();
        if piece.pieces() as usize != processes || piece.piece() as usize != self.controller.local_process_id() {
            return Err(PipelineError::configuration(format!(
                "{piece} requested on process {} of {processes}",
                self.controller.local_process_id()
            )));
        }
        let info = ctx
            .input_information(0, 0)
            .ok_or_else(|| PipelineError::configuration("input information missing"))?;
        let whole = Extent::from_array(info.require(keys::WHOLE_EXTENT)?)?;
        let mode = info
            .get(keys::SPLIT_MODE)
            .and_then(|mode| SplitMode::from_str(&mode).ok())
            .unwrap_or_default();
        let translator = ExtentTranslator::new(mode);
        let target = match request.extent {
            Some(extent) => extent,
            None => translator
                .ghosted_extent(&whole, &piece)
                .ok_or_else(|| PipelineError::InvalidExtent(format!("{piece} of {whole} is empty")))?,
        };
        let received = self.exchange(input, &translator, &whole, &piece, &target)?;
        let mut values = Vec::with_capacity(target.number_of_points());
        for point in target.points() {
            let value = input.value_at(point).or_else(|| {
                received
                    .iter()
                    .find_map(|(extent, values)| extent.point_index(point).map(|i| values[i]))
            });
            match value {
                Some(value) => values.push(value),
                None => {
                    return Err(PipelineError::data(format!("no process holds point {point:?}")));
                }
            }
        }
        debug!(
            "{} grew {} to {target} with {} neighbours",
            ctx.stage(),
            input.extent().map_or_else(String::new, |e| e.to_string()),
            received.len()
        );
        let mut output = DataObject::structured(input.kind(), target, values);
        output.set_ghost_levels(piece.ghost_levels());
        if let Some(time) = input.time() {
            output.set_time(time);
        }
        ctx.set_output(0, output);
        Ok(())
    }
}
