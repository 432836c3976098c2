//! Parameter catalog interface.
//!
//! The catalog itself (the large declarative table of parameter ids, types,
//! ranges, and names that ships with a given firmware generation) lives
//! outside this crate. The batcher and the full-parameter convenience methods
//! only need the small surface below.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A structured parameter value, as mapped from or to its raw on-wire text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Any of the integer parameter types (u8/u16/u32/i32 on the unit).
    Integer(i64),
    Decimal(f64),
    Text(String),
    /// A bitflag parameter, carried as the combined raw bits.
    Flags(u64),
}

/// Catalog of known parameters for a device family.
///
/// Implementations are expected to be cheap to query; the batcher calls
/// [`max_raw_len`](ParameterCatalog::max_raw_len) once per requested id.
pub trait ParameterCatalog: Send + Sync {
    /// Every known parameter id, in catalog order.
    fn parameter_ids(&self) -> Vec<u16>;

    /// Upper bound on the raw-text length of the id's value, or `None` for
    /// ids the catalog does not know.
    fn max_raw_len(&self, id: u16) -> Option<usize>;

    /// Maps raw id/value pairs into structured, named values.
    ///
    /// Ids absent from the catalog are skipped, matching the firmware's
    /// habit of reporting ids a given hardware revision does not expose.
    fn raw_to_structured(&self, raw: &HashMap<u16, String>) -> Result<HashMap<String, ParamValue>>;

    /// Maps structured, named values back into raw id/value pairs.
    ///
    /// Fails with [`TrackError::InvalidValue`](crate::TrackError::InvalidValue)
    /// for values out of range or of the wrong shape for their parameter.
    fn structured_to_raw(&self, values: &HashMap<String, ParamValue>) -> Result<HashMap<u16, String>>;
}
