//! Typed, per port metadata exchanged between stages.
//!
//! An [Information] maps [InfoKey]s to values.  Each key declares the shape
//! of its value at compile time, so a key can only be set with a value of
//! the right type and reading it back with [Information::get] yields that
//! type, or `None` if the key was never set.

pub mod keys;

use crate::error::{PipelineError, PipelineResult};

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

/// The stored representation of a value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum InfoValue {
    Integer(i64),
    Double(f64),
    Flag(bool),
    Text(String),
    IntegerVec(Vec<i64>),
    DoubleVec(Vec<f64>),
}

/// Types that can be stored under an [InfoKey].
pub trait InfoType: Sized {
    fn into_value(self) -> InfoValue;
    fn from_value(value: &InfoValue) -> Option<Self>;
}

/// Marker for variable length vector values, which expose
/// [Information::length].
pub trait VariableLength: InfoType {}

impl InfoType for i64 {
    fn into_value(self) -> InfoValue {
        InfoValue::Integer(self)
    }
    fn from_value(value: &InfoValue) -> Option<Self> {
        match value {
            InfoValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl InfoType for f64 {
    fn into_value(self) -> InfoValue {
        InfoValue::Double(self)
    }
    fn from_value(value: &InfoValue) -> Option<Self> {
        match value {
            InfoValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl InfoType for bool {
    fn into_value(self) -> InfoValue {
        InfoValue::Flag(self)
    }
    fn from_value(value: &InfoValue) -> Option<Self> {
        match value {
            InfoValue::Flag(v) => Some(*v),
            _ => None,
        }
    }
}

impl InfoType for String {
    fn into_value(self) -> InfoValue {
        InfoValue::Text(self)
    }
    fn from_value(value: &InfoValue) -> Option<Self> {
        match value {
            InfoValue::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl InfoType for Vec<i64> {
    fn into_value(self) -> InfoValue {
        InfoValue::IntegerVec(self)
    }
    fn from_value(value: &InfoValue) -> Option<Self> {
        match value {
            InfoValue::IntegerVec(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl InfoType for Vec<f64> {
    fn into_value(self) -> InfoValue {
        InfoValue::DoubleVec(self)
    }
    fn from_value(value: &InfoValue) -> Option<Self> {
        match value {
            InfoValue::DoubleVec(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl VariableLength for Vec<i64> {}
impl VariableLength for Vec<f64> {}

// fixed length vectors are stored as vectors and checked for length on the
// way out
impl<const N: usize> InfoType for [i64; N] {
    fn into_value(self) -> InfoValue {
        InfoValue::IntegerVec(self.to_vec())
    }
    fn from_value(value: &InfoValue) -> Option<Self> {
        match value {
            InfoValue::IntegerVec(v) => v.as_slice().try_into().ok(),
            _ => None,
        }
    }
}

impl<const N: usize> InfoType for [f64; N] {
    fn into_value(self) -> InfoValue {
        InfoValue::DoubleVec(self.to_vec())
    }
    fn from_value(value: &InfoValue) -> Option<Self> {
        match value {
            InfoValue::DoubleVec(v) => v.as_slice().try_into().ok(),
            _ => None,
        }
    }
}

/// A named key whose value has type `T`.
pub struct InfoKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> InfoKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for InfoKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for InfoKey<T> {}

impl<T> fmt::Debug for InfoKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoKey({})", self.name)
    }
}

/// Key/value store attached to one port.  Entries are kept sorted by key
/// name so two objects with equal contents serialise to identical bytes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Information {
    entries: BTreeMap<&'static str, InfoValue>,
}

impl Information {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: InfoType>(&mut self, key: InfoKey<T>, value: T) {
        self.entries.insert(key.name, value.into_value());
    }

    /// The value stored under `key`, or `None` if it was never set (or was
    /// stored with a different shape).
    pub fn get<T: InfoType>(&self, key: InfoKey<T>) -> Option<T> {
        self.entries.get(key.name).and_then(T::from_value)
    }

    /// The value stored under `key`, or a configuration error naming the key.
    pub fn require<T: InfoType>(&self, key: InfoKey<T>) -> PipelineResult<T> {
        self.get(key)
            .ok_or_else(|| PipelineError::configuration(format!("missing {}", key.name)))
    }

    pub fn has<T: InfoType>(&self, key: InfoKey<T>) -> bool {
        self.get(key).is_some()
    }

    pub fn remove<T: InfoType>(&mut self, key: InfoKey<T>) -> Option<T> {
        self.entries.remove(key.name).and_then(|value| T::from_value(&value))
    }

    /// Number of elements of a variable length vector, zero if absent.
    pub fn length<T: VariableLength>(&self, key: InfoKey<T>) -> usize {
        match self.entries.get(key.name) {
            Some(InfoValue::IntegerVec(v)) => v.len(),
            Some(InfoValue::DoubleVec(v)) => v.len(),
            _ => 0,
        }
    }

    /// Copies the named entries present in `other` into this object.
    pub fn copy_entries_from(&mut self, other: &Information, names: &[&'static str]) {
        for &name in names {
            if let Some(value) = other.entries.get(name) {
                self.entries.insert(name, value.clone());
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stable byte representation, used to compare information passes.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {

    use super::keys::*;
    use super::*;

    #[test]
    fn missing_keys_are_not_present() {
        let info = Information::new();
        assert_eq!(info.get(WHOLE_EXTENT), None);
        assert!(!info.has(UPDATE_TIME_STEP));
        assert_eq!(info.length(TIME_STEPS), 0);
        let err = info.require(WHOLE_EXTENT).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("WHOLE_EXTENT"));
    }

    #[test]
    fn typed_round_trip() {
        let mut info = Information::new();
        info.set(WHOLE_EXTENT, [0, 9, 0, 9, 0, 0]);
        info.set(TIME_STEPS, vec![0.0, 0.5, 1.0]);
        info.set(EXACT_EXTENT, true);
        info.set(SPLIT_MODE, "Block".to_string());
        assert_eq!(info.get(WHOLE_EXTENT), Some([0, 9, 0, 9, 0, 0]));
        assert_eq!(info.length(TIME_STEPS), 3);
        assert_eq!(info.get(EXACT_EXTENT), Some(true));
        assert_eq!(info.get(SPLIT_MODE).as_deref(), Some("Block"));
        assert_eq!(info.remove(EXACT_EXTENT), Some(true));
        assert!(!info.has(EXACT_EXTENT));
    }

    #[test]
    fn wrong_shape_reads_as_absent() {
        let mut info = Information::new();
        let short: InfoKey<Vec<i64>> = InfoKey::new(WHOLE_EXTENT.name());
        info.set(short, vec![0, 1]);
        // stored under the same name but not six integers long
        assert_eq!(info.get(WHOLE_EXTENT), None);
    }

    #[test]
    fn serialisation_is_order_independent() {
        let mut a = Information::new();
        a.set(TIME_RANGE, [0.0, 9.0]);
        a.set(WHOLE_EXTENT, [0, 1, 0, 1, 0, 1]);
        let mut b = Information::new();
        b.set(WHOLE_EXTENT, [0, 1, 0, 1, 0, 1]);
        b.set(TIME_RANGE, [0.0, 9.0]);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn copy_named_entries() {
        let mut upstream = Information::new();
        upstream.set(WHOLE_EXTENT, [0, 3, 0, 3, 0, 0]);
        upstream.set(CAN_PRODUCE_SUB_EXTENT, true);
        let mut downstream = Information::new();
        downstream.copy_entries_from(&upstream, DOWNSTREAM_KEYS);
        assert!(downstream.has(WHOLE_EXTENT));
        assert!(!downstream.has(CAN_PRODUCE_SUB_EXTENT));
    }
}
