//! Greedy packing of parameter requests into size-bounded messages.
//!
//! Transports cap how long a single outgoing command may be, and a fleet's
//! parameter list is far longer than any cap. The batcher partitions an
//! ordered id list (or id/value list, for sets) into batches whose projected
//! command/response length stays under the transport limit.
//!
//! The algorithm is a single greedy pass. Batch boundaries are a
//! deterministic function of prefix sums only: no repacking, no
//! optimization, input order preserved. Concatenating the produced batches
//! always reproduces the input exactly.

use tracing::warn;

use crate::error::{Result, TrackError};
use crate::params::ParameterCatalog;

/// The response echoes every value back with this fixed framing, which is
/// always longer than the request's, so batches are sized against it.
const RESPONSE_OVERHEAD: usize = "Param ID: Value:".len();

/// Splits `ids` into get-request batches that fit `max_command_len`.
///
/// Each id's projected contribution is `";{id}:"` plus the catalog's maximum
/// raw length for that id. Ids the catalog does not know fail the whole call
/// with [`TrackError::UnknownParameter`].
///
/// An id whose own contribution exceeds the limit is emitted alone (with a
/// warning) rather than rejected, so callers can still attempt it.
pub fn batch_param_ids(
    ids: &[u16],
    max_command_len: usize,
    catalog: &dyn ParameterCatalog,
) -> Result<Vec<Vec<u16>>> {
    let mut entries = Vec::with_capacity(ids.len());
    for &id in ids {
        let max_len = catalog
            .max_raw_len(id)
            .ok_or(TrackError::UnknownParameter { id })?;
        // ";{id}:" plus the worst-case value
        entries.push((id, 1 + digits(id) + 1 + max_len));
    }
    Ok(batch_entries(entries, max_command_len))
}

/// Splits id/raw-value pairs into set-request batches that fit
/// `max_command_len`.
///
/// Unlike gets, the exact value text is known up front, so each pair
/// contributes `";{id}:{value}"` with the real value length.
pub fn batch_param_values(
    values: &[(u16, String)],
    max_command_len: usize,
) -> Vec<Vec<(u16, String)>> {
    let entries = values
        .iter()
        .map(|(id, value)| ((*id, value.clone()), 1 + digits(*id) + 1 + value.len()))
        .collect();
    batch_entries(entries, max_command_len)
}

fn batch_entries<T>(entries: Vec<(T, usize)>, max_command_len: usize) -> Vec<Vec<T>> {
    let mut batches = Vec::new();
    let mut batch: Vec<T> = Vec::new();
    let mut batch_len = 0usize;

    for (entry, additional) in entries {
        if RESPONSE_OVERHEAD + batch_len + additional > max_command_len {
            if batch.is_empty() {
                // Even alone this entry busts the limit. Emit it on its own
                // anyway; the device may still accept it and the caller gets
                // every id back either way.
                warn!(
                    required = RESPONSE_OVERHEAD + additional,
                    max_command_len, "single parameter exceeds max command length, batching alone"
                );
                batches.push(vec![entry]);
            } else {
                batches.push(std::mem::take(&mut batch));
                batch.push(entry);
                batch_len = additional;
            }
        } else {
            batch.push(entry);
            batch_len += additional;
        }
    }

    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

fn digits(id: u16) -> usize {
    id.to_string().len()
}
