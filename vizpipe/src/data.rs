//! Data objects passed between stages.
//!
//! A [DataObject] is cheap to clone: its point values live behind an `Arc`
//! and are shared between the producer and every consumer until someone
//! asks to mutate them, at which point [DataObject::values_mut] copies.

use crate::extent::Extent;
use crate::information::{Information, keys};
use crate::mtime::ModTime;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::{Display, EnumString};

/// Broad dataset categories, used for port type constraints.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum DataKind {
    /// Point values on a regular structured extent.
    ImageData,
    /// Point values on a structured extent with explicit coordinates.
    RectilinearGrid,
    /// Geometry such as outlines.
    PolyData,
    /// A collection of child data objects.
    MultiBlock,
}

/// Shared, immutable point values.
#[derive(Clone, Debug, Default)]
pub struct Payload(Arc<Vec<f64>>);

impl Payload {
    pub fn new(values: Vec<f64>) -> Self {
        Self(Arc::new(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.0.len() * std::mem::size_of::<f64>()
    }

    /// True if another data object holds the same buffer.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }

    pub fn ptr_eq(&self, other: &Payload) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Mutable access, copying the buffer first if it is shared.
    pub fn make_mut(&mut self) -> &mut Vec<f64> {
        Arc::make_mut(&mut self.0)
    }

    /// Hands back the buffer if nobody else holds it.
    pub fn try_into_inner(self) -> Result<Vec<f64>, Payload> {
        Arc::try_unwrap(self.0).map_err(Payload)
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.as_slice() == other.as_slice()
    }
}

impl From<Vec<f64>> for Payload {
    fn from(values: Vec<f64>) -> Self {
        Payload::new(values)
    }
}

#[derive(Clone, Debug)]
pub struct DataObject {
    kind: DataKind,
    extent: Option<Extent>,
    ghost_levels: u32,
    values: Payload,
    bounds: Option<[f64; 6]>,
    blocks: Vec<DataObject>,
    information: Information,
    mtime: ModTime,
}

impl DataObject {
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            extent: None,
            ghost_levels: 0,
            values: Payload::default(),
            bounds: None,
            blocks: Vec::new(),
            information: Information::new(),
            mtime: ModTime::ZERO,
        }
    }

    /// Structured data holding one value per point of `extent`.
    pub fn structured(kind: DataKind, extent: Extent, values: Vec<f64>) -> Self {
        debug_assert_eq!(values.len(), extent.number_of_points());
        let mut data = Self::new(kind);
        data.extent = Some(extent);
        data.values = Payload::new(values);
        data
    }

    pub fn multi_block(blocks: Vec<DataObject>) -> Self {
        let mut data = Self::new(DataKind::MultiBlock);
        data.blocks = blocks;
        data
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn extent(&self) -> Option<Extent> {
        self.extent
    }

    pub fn ghost_levels(&self) -> u32 {
        self.ghost_levels
    }

    pub fn set_ghost_levels(&mut self, ghost_levels: u32) {
        self.ghost_levels = ghost_levels;
    }

    pub fn values(&self) -> &[f64] {
        self.values.as_slice()
    }

    pub fn payload(&self) -> &Payload {
        &self.values
    }

    pub fn set_payload(&mut self, payload: Payload) {
        self.values = payload;
    }

    /// Detaches the point values, leaving this object empty.
    pub fn take_payload(&mut self) -> Payload {
        std::mem::take(&mut self.values)
    }

    /// Copy-on-write access to the point values.
    pub fn values_mut(&mut self) -> &mut Vec<f64> {
        self.values.make_mut()
    }

    /// Value at a point index, if the point lies inside this object's extent.
    pub fn value_at(&self, point: [i64; 3]) -> Option<f64> {
        self.extent
            .and_then(|extent| extent.point_index(point))
            .and_then(|index| self.values().get(index).copied())
    }

    pub fn bounds(&self) -> Option<[f64; 6]> {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: [f64; 6]) {
        self.bounds = Some(bounds);
    }

    pub fn blocks(&self) -> &[DataObject] {
        &self.blocks
    }

    pub fn blocks_mut(&mut self) -> &mut Vec<DataObject> {
        &mut self.blocks
    }

    pub fn information(&self) -> &Information {
        &self.information
    }

    pub fn information_mut(&mut self) -> &mut Information {
        &mut self.information
    }

    /// Time of the step held, if any.
    pub fn time(&self) -> Option<f64> {
        self.information.get(keys::DATA_TIME_STEP)
    }

    pub fn set_time(&mut self, time: f64) {
        self.information.set(keys::DATA_TIME_STEP, time);
    }

    /// Stamp given by the executive when the object was produced.
    pub fn mtime(&self) -> ModTime {
        self.mtime
    }

    pub(crate) fn set_mtime(&mut self, mtime: ModTime) {
        self.mtime = mtime;
    }

    /// Total payload bytes, including children.
    pub fn memory_size(&self) -> usize {
        self.values.bytes() + self.blocks.iter().map(DataObject::memory_size).sum::<usize>()
    }

    /// A new object restricted to `target`, which must lie inside this
    /// object's extent.  The original is left untouched.
    pub fn cropped(&self, target: &Extent) -> Option<DataObject> {
        let extent = self.extent?;
        if !extent.contains(target) {
            return None;
        }
        if extent == *target {
            return Some(self.clone());
        }
        let values = target
            .points()
            .filter_map(|point| self.value_at(point))
            .collect::<Vec<f64>>();
        let mut out = self.clone();
        out.extent = Some(*target);
        out.values = Payload::new(values);
        Some(out)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn image(extent: [i64; 6]) -> DataObject {
        let extent = Extent::from_array(extent).unwrap();
        let values = extent.points().map(|[i, j, k]| (i + 10 * j + 100 * k) as f64).collect();
        DataObject::structured(DataKind::ImageData, extent, values)
    }

    #[test]
    fn clones_share_until_written() {
        let original = image([0, 3, 0, 3, 0, 0]);
        let mut copy = original.clone();
        assert!(copy.payload().ptr_eq(original.payload()));
        copy.values_mut()[0] = -1.0;
        assert!(!copy.payload().ptr_eq(original.payload()));
        assert_eq!(original.values()[0], 0.0);
        assert_eq!(copy.values()[0], -1.0);
    }

    #[test]
    fn crop_keeps_point_values() {
        let data = image([0, 5, 0, 5, 0, 0]);
        let target = Extent::new(2, 3, 1, 4, 0, 0).unwrap();
        let cropped = data.cropped(&target).unwrap();
        assert_eq!(cropped.extent(), Some(target));
        assert_eq!(cropped.values().len(), 8);
        assert_eq!(cropped.value_at([3, 4, 0]), Some(43.0));
        assert!(data.cropped(&Extent::new(0, 9, 0, 0, 0, 0).unwrap()).is_none());
    }

    #[test]
    fn time_lives_in_data_information() {
        let mut data = DataObject::new(DataKind::PolyData);
        assert_eq!(data.time(), None);
        data.set_time(2.5);
        assert_eq!(data.time(), Some(2.5));
    }
}
