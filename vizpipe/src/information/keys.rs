//! The key catalogue.

use super::InfoKey;

/// Largest extent the producer can deliver.
pub const WHOLE_EXTENT: InfoKey<[i64; 6]> = InfoKey::new("WHOLE_EXTENT");
pub const ORIGIN: InfoKey<[f64; 3]> = InfoKey::new("ORIGIN");
pub const SPACING: InfoKey<[f64; 3]> = InfoKey::new("SPACING");
/// Published time values, sorted ascending.
pub const TIME_STEPS: InfoKey<Vec<f64>> = InfoKey::new("TIME_STEPS");
pub const TIME_RANGE: InfoKey<[f64; 2]> = InfoKey::new("TIME_RANGE");
pub const CAN_PRODUCE_SUB_EXTENT: InfoKey<bool> = InfoKey::new("CAN_PRODUCE_SUB_EXTENT");
pub const CAN_HANDLE_PIECE_REQUEST: InfoKey<bool> = InfoKey::new("CAN_HANDLE_PIECE_REQUEST");
/// How piece requests are translated into structured extents, see
/// [SplitMode](crate::SplitMode).
pub const SPLIT_MODE: InfoKey<String> = InfoKey::new("SPLIT_MODE");
/// Type name of the stage that produced this information.
pub const PRODUCER: InfoKey<String> = InfoKey::new("PRODUCER");

pub const UPDATE_EXTENT: InfoKey<[i64; 6]> = InfoKey::new("UPDATE_EXTENT");
pub const UPDATE_PIECE_NUMBER: InfoKey<i64> = InfoKey::new("UPDATE_PIECE_NUMBER");
pub const UPDATE_NUMBER_OF_PIECES: InfoKey<i64> = InfoKey::new("UPDATE_NUMBER_OF_PIECES");
pub const UPDATE_NUMBER_OF_GHOST_LEVELS: InfoKey<i64> = InfoKey::new("UPDATE_NUMBER_OF_GHOST_LEVELS");
pub const UPDATE_TIME_STEP: InfoKey<f64> = InfoKey::new("UPDATE_TIME_STEP");
/// Set when the consumer cannot accept more than the requested extent.
pub const EXACT_EXTENT: InfoKey<bool> = InfoKey::new("EXACT_EXTENT");

/// Time of the step a data object actually holds.
pub const DATA_TIME_STEP: InfoKey<f64> = InfoKey::new("DATA_TIME_STEP");

/// Entries copied from the first input into every output before a stage's
/// information callback runs.
pub const DOWNSTREAM_KEYS: &[&str] = &[
    WHOLE_EXTENT.name,
    ORIGIN.name,
    SPACING.name,
    TIME_STEPS.name,
    TIME_RANGE.name,
    SPLIT_MODE.name,
];
