//! Descriptions of the subset of a dataset a consumer asks for: an index space
//! extent, a piece of a decomposition, a time, or a combination of these.

use crate::error::{PipelineError, PipelineResult};
use crate::information::{Information, keys};
use crate::time_steps::{DEFAULT_TIME_TOLERANCE, within_tolerance};

use derive_more::Display;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::{max, min};

/// A structured extent: inclusive point index ranges on the i, j and k axes,
/// stored as `[imin, imax, jmin, jmax, kmin, kmax]`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize, Display)]
#[display("[{}..{}, {}..{}, {}..{}]", _0[0], _0[1], _0[2], _0[3], _0[4], _0[5])]
pub struct Extent([i64; 6]);

impl Extent {
    pub fn new(imin: i64, imax: i64, jmin: i64, jmax: i64, kmin: i64, kmax: i64) -> PipelineResult<Self> {
        Self::from_array([imin, imax, jmin, jmax, kmin, kmax])
    }

    pub fn from_array(bounds: [i64; 6]) -> PipelineResult<Self> {
        for axis in 0..3 {
            if bounds[2 * axis] > bounds[2 * axis + 1] {
                return Err(PipelineError::InvalidExtent(format!(
                    "{bounds:?} has min > max on axis {axis}"
                )));
            }
        }
        Ok(Self(bounds))
    }

    pub fn as_array(&self) -> [i64; 6] {
        self.0
    }

    pub fn min(&self, axis: usize) -> i64 {
        self.0[2 * axis]
    }

    pub fn max(&self, axis: usize) -> i64 {
        self.0[2 * axis + 1]
    }

    /// Number of points along each axis.
    pub fn dimensions(&self) -> [usize; 3] {
        [0, 1, 2].map(|axis| (self.max(axis) - self.min(axis) + 1) as usize)
    }

    pub fn number_of_points(&self) -> usize {
        self.dimensions().iter().product()
    }

    /// True if `other` lies entirely inside this extent.
    pub fn contains(&self, other: &Extent) -> bool {
        (0..3).all(|axis| other.min(axis) >= self.min(axis) && other.max(axis) <= self.max(axis))
    }

    pub fn contains_point(&self, point: [i64; 3]) -> bool {
        (0..3).all(|axis| point[axis] >= self.min(axis) && point[axis] <= self.max(axis))
    }

    /// The smallest extent containing both.
    pub fn union(&self, other: &Extent) -> Extent {
        let mut out = [0; 6];
        for axis in 0..3 {
            out[2 * axis] = min(self.min(axis), other.min(axis));
            out[2 * axis + 1] = max(self.max(axis), other.max(axis));
        }
        Extent(out)
    }

    pub fn intersection(&self, other: &Extent) -> Option<Extent> {
        let mut out = [0; 6];
        for axis in 0..3 {
            out[2 * axis] = max(self.min(axis), other.min(axis));
            out[2 * axis + 1] = min(self.max(axis), other.max(axis));
            if out[2 * axis] > out[2 * axis + 1] {
                return None;
            }
        }
        Some(Extent(out))
    }

    /// Adds `levels` layers on every side. Axes that are flat (a single point)
    /// stay flat.
    pub fn grow(&self, levels: i64) -> Extent {
        let mut out = self.0;
        for axis in 0..3 {
            if self.min(axis) < self.max(axis) {
                out[2 * axis] -= levels;
                out[2 * axis + 1] += levels;
            }
        }
        Extent(out)
    }

    pub fn clip(&self, whole: &Extent) -> Option<Extent> {
        self.intersection(whole)
    }

    /// Offset of a point in a buffer laid out over this extent, i fastest.
    pub fn point_index(&self, point: [i64; 3]) -> Option<usize> {
        if !self.contains_point(point) {
            return None;
        }
        let [ni, nj, _] = self.dimensions();
        let i = (point[0] - self.min(0)) as usize;
        let j = (point[1] - self.min(1)) as usize;
        let k = (point[2] - self.min(2)) as usize;
        Some(i + ni * (j + nj * k))
    }

    /// Points in buffer order (i fastest, then j, then k).
    pub fn points(&self) -> impl Iterator<Item = [i64; 3]> + '_ {
        (self.min(2)..=self.max(2)).flat_map(move |k| {
            (self.min(1)..=self.max(1))
                .flat_map(move |j| (self.min(0)..=self.max(0)).map(move |i| [i, j, k]))
        })
    }
}

impl TryFrom<[i64; 6]> for Extent {
    type Error = PipelineError;
    fn try_from(bounds: [i64; 6]) -> PipelineResult<Self> {
        Extent::from_array(bounds)
    }
}

impl From<Extent> for [i64; 6] {
    fn from(extent: Extent) -> Self {
        extent.0
    }
}

/// One piece of a decomposition into `pieces` parts, with `ghost_levels`
/// layers of overlap with the neighbouring pieces.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize, Display)]
#[display("piece {piece}/{pieces} ghosts {ghost_levels}")]
pub struct PieceExtent {
    piece: u32,
    pieces: u32,
    ghost_levels: u32,
}

impl PieceExtent {
    pub fn new(piece: u32, pieces: u32, ghost_levels: u32) -> PipelineResult<Self> {
        if pieces == 0 || piece >= pieces {
            return Err(PipelineError::InvalidExtent(format!(
                "piece {piece} of {pieces}"
            )));
        }
        Ok(Self {
            piece,
            pieces,
            ghost_levels,
        })
    }

    pub fn piece(&self) -> u32 {
        self.piece
    }

    pub fn pieces(&self) -> u32 {
        self.pieces
    }

    pub fn ghost_levels(&self) -> u32 {
        self.ghost_levels
    }

    pub fn with_ghost_levels(&self, ghost_levels: u32) -> Self {
        Self {
            ghost_levels,
            ..*self
        }
    }
}

/// A finite point in time.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Display)]
#[display("t={_0}")]
pub struct TimeValue(OrderedFloat<f64>);

impl TimeValue {
    pub fn new(time: f64) -> PipelineResult<Self> {
        if !time.is_finite() {
            return Err(PipelineError::InvalidExtent(format!("time {time} is not finite")));
        }
        Ok(Self(OrderedFloat(time)))
    }

    pub fn value(&self) -> f64 {
        self.0.into_inner()
    }
}

/// A single dimension of a request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Display)]
pub enum ExtentDescriptor {
    Structured(Extent),
    Piece(PieceExtent),
    Time(TimeValue),
}

/// What one consumer asks of one output port.  An absent extent or piece
/// means the whole dataset; an absent time means the producer's default time.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct UpdateRequest {
    pub extent: Option<Extent>,
    pub piece: Option<PieceExtent>,
    pub time: Option<TimeValue>,
    /// The consumer needs exactly the requested extent, not a superset.
    pub exact: bool,
}

impl UpdateRequest {
    /// The whole dataset at the default time.
    pub fn whole() -> Self {
        Self::default()
    }

    pub fn with_extent(mut self, extent: Extent) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn with_piece(mut self, piece: u32, pieces: u32, ghost_levels: u32) -> PipelineResult<Self> {
        self.piece = Some(PieceExtent::new(piece, pieces, ghost_levels)?);
        Ok(self)
    }

    pub fn with_time(mut self, time: f64) -> PipelineResult<Self> {
        self.time = Some(TimeValue::new(time)?);
        Ok(self)
    }

    pub fn with_exact(mut self, exact: bool) -> Self {
        self.exact = exact;
        self
    }

    pub fn ghost_levels(&self) -> u32 {
        self.piece.map(|p| p.ghost_levels()).unwrap_or(0)
    }

    pub fn descriptors(&self) -> SmallVec<[ExtentDescriptor; 3]> {
        let mut out = SmallVec::new();
        if let Some(extent) = self.extent {
            out.push(ExtentDescriptor::Structured(extent));
        }
        if let Some(piece) = self.piece {
            out.push(ExtentDescriptor::Piece(piece));
        }
        if let Some(time) = self.time {
            out.push(ExtentDescriptor::Time(time));
        }
        out
    }

    /// The smallest request satisfying both this and `other`.
    ///
    /// A piece without an extent stands for the piece's structured extent,
    /// which is only known once translated against the whole extent.  Mixing
    /// one with an explicit extent therefore widens to the whole dataset.
    pub fn union(&self, other: &UpdateRequest) -> PipelineResult<UpdateRequest> {
        self.union_with_tolerance(other, DEFAULT_TIME_TOLERANCE)
    }

    pub fn union_with_tolerance(&self, other: &UpdateRequest, tolerance: f64) -> PipelineResult<UpdateRequest> {
        let extent = match (self.extent, other.extent) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            _ => None,
        };
        let untranslated = |r: &UpdateRequest| r.extent.is_none() && r.piece.is_some();
        let mixed =
            (untranslated(self) && other.extent.is_some()) || (untranslated(other) && self.extent.is_some());
        let piece = match (self.piece, other.piece) {
            (Some(a), Some(b)) => {
                if a.piece != b.piece || a.pieces != b.pieces {
                    return Err(PipelineError::IncompatibleRequests(format!("{a} and {b}")));
                }
                Some(a.with_ghost_levels(max(a.ghost_levels, b.ghost_levels)))
            }
            _ => None,
        };
        let piece = if mixed { None } else { piece };
        let time = match (self.time, other.time) {
            (Some(a), Some(b)) => {
                if !within_tolerance(a.value(), b.value(), tolerance) {
                    return Err(PipelineError::IncompatibleRequests(format!("{a} and {b}")));
                }
                Some(a)
            }
            (a, b) => a.or(b),
        };
        Ok(UpdateRequest {
            extent,
            piece,
            time,
            exact: self.exact || other.exact,
        })
    }

    /// Writes the request into the `UPDATE_*` keys, clearing stale ones.
    pub fn write_to(&self, info: &mut Information) {
        Self::clear(info);
        if let Some(extent) = self.extent {
            info.set(keys::UPDATE_EXTENT, extent.as_array());
        }
        if let Some(piece) = self.piece {
            info.set(keys::UPDATE_PIECE_NUMBER, piece.piece as i64);
            info.set(keys::UPDATE_NUMBER_OF_PIECES, piece.pieces as i64);
            info.set(keys::UPDATE_NUMBER_OF_GHOST_LEVELS, piece.ghost_levels as i64);
        }
        if let Some(time) = self.time {
            info.set(keys::UPDATE_TIME_STEP, time.value());
        }
        info.set(keys::EXACT_EXTENT, self.exact);
    }

    pub fn from_information(info: &Information) -> PipelineResult<Self> {
        let extent = info.get(keys::UPDATE_EXTENT).map(Extent::from_array).transpose()?;
        let piece = match info.get(keys::UPDATE_PIECE_NUMBER) {
            Some(piece) => {
                let pieces = info.get(keys::UPDATE_NUMBER_OF_PIECES).unwrap_or(1);
                let ghosts = info.get(keys::UPDATE_NUMBER_OF_GHOST_LEVELS).unwrap_or(0);
                if piece < 0 || pieces < 1 || ghosts < 0 {
                    return Err(PipelineError::InvalidExtent(format!(
                        "piece {piece} of {pieces} with {ghosts} ghost levels"
                    )));
                }
                Some(PieceExtent::new(piece as u32, pieces as u32, ghosts as u32)?)
            }
            None => None,
        };
        let time = info.get(keys::UPDATE_TIME_STEP).map(TimeValue::new).transpose()?;
        Ok(UpdateRequest {
            extent,
            piece,
            time,
            exact: info.get(keys::EXACT_EXTENT).unwrap_or(false),
        })
    }

    pub fn clear(info: &mut Information) {
        info.remove(keys::UPDATE_EXTENT);
        info.remove(keys::UPDATE_PIECE_NUMBER);
        info.remove(keys::UPDATE_NUMBER_OF_PIECES);
        info.remove(keys::UPDATE_NUMBER_OF_GHOST_LEVELS);
        info.remove(keys::UPDATE_TIME_STEP);
        info.remove(keys::EXACT_EXTENT);
    }
}

impl std::fmt::Display for UpdateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let descriptors = self.descriptors();
        if descriptors.is_empty() {
            write!(f, "whole")?;
        } else {
            let parts: Vec<String> = descriptors.iter().map(|d| d.to_string()).collect();
            write!(f, "{}", parts.join(" "))?;
        }
        if self.exact {
            write!(f, " exact")?;
        }
        Ok(())
    }
}
