//! High-level command orchestration.
//!
//! [`CommandClient`] turns "get these 400 parameters" into batched
//! `getparam`/`setparam` commands sized for the transport, drives them with
//! retry, parses the response grammar, and reconciles what came back against
//! what was asked.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use tracing::{debug, info, warn};

use crate::batcher::{batch_param_ids, batch_param_values};
use crate::device_id::DeviceId;
use crate::error::{Result, TrackError};
use crate::params::{ParamValue, ParameterCatalog};
use crate::transport::Transport;

/// Retry policy for [`CommandClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Attempts for one `run_command` call.
    pub command_attempts: u32,
    /// Attempts for each get/set batch.
    pub attempts_per_batch: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { command_attempts: 3, attempts_per_batch: 3 }
    }
}

/// Drives get/set operations against one transport.
pub struct CommandClient<T, C> {
    transport: T,
    catalog: C,
    config: ClientConfig,
}

impl<T, C> CommandClient<T, C>
where
    T: Transport,
    C: ParameterCatalog,
{
    pub fn new(transport: T, catalog: C) -> Self {
        Self::with_config(transport, catalog, ClientConfig::default())
    }

    pub fn with_config(transport: T, catalog: C, config: ClientConfig) -> Self {
        Self { transport, catalog, config }
    }

    /// Runs one raw command with retry.
    ///
    /// Transient failures are retried up to the configured attempt count; a
    /// timeout aborts immediately (the unit is not answering, and the
    /// transport already waited out its full deadline), as does anything else
    /// [`TrackError::is_retryable`] rules out. After exhausting attempts the
    /// last error is surfaced.
    pub async fn run_command(&self, device: &DeviceId, command: &str) -> Result<String> {
        let attempts = self.config.command_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            if last_err.is_some() {
                warn!(%device, attempt, attempts, "retrying command");
            }
            match self.transport.run_command(device, command).await {
                Ok(response) => return Ok(response),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => last_err = Some(err),
            }
        }
        // attempts >= 1, so at least one iteration ran.
        Err(last_err.unwrap_or_else(|| TrackError::transport("no command attempt was made")))
    }

    /// Fetches raw values for `ids`, batching as needed.
    ///
    /// Each batch is retried as a whole; ids from batches that already
    /// succeeded are kept even if a later batch ultimately fails.
    pub async fn get_raw_parameters(
        &self,
        device: &DeviceId,
        ids: &[u16],
    ) -> Result<HashMap<u16, String>> {
        let batches = batch_param_ids(ids, self.transport.max_command_len(), &self.catalog)?;
        info!(
            %device,
            params = ids.len(),
            batches = batches.len(),
            "requesting parameters"
        );

        let mut params = HashMap::with_capacity(ids.len());
        for (batch_nr, batch) in batches.iter().enumerate() {
            debug!(%device, batch = batch_nr + 1, total = batches.len(), "getting batch");
            let batch_params = self
                .retry_batch(device, batch_nr, || self.get_batch(device, batch))
                .await?;
            params.extend(batch_params);
        }
        Ok(params)
    }

    /// Writes raw values, batching as needed.
    pub async fn set_raw_parameters(
        &self,
        device: &DeviceId,
        values: &[(u16, String)],
    ) -> Result<()> {
        let batches = batch_param_values(values, self.transport.max_command_len());
        info!(
            %device,
            params = values.len(),
            batches = batches.len(),
            "setting parameters"
        );

        for (batch_nr, batch) in batches.iter().enumerate() {
            debug!(%device, batch = batch_nr + 1, total = batches.len(), "setting batch");
            self.retry_batch(device, batch_nr, || self.set_batch(device, batch)).await?;
        }
        Ok(())
    }

    /// Fetches every catalog parameter and maps it to structured values.
    pub async fn get_full_parameters(
        &self,
        device: &DeviceId,
    ) -> Result<HashMap<String, ParamValue>> {
        let ids = self.catalog.parameter_ids();
        let raw = self.get_raw_parameters(device, &ids).await?;
        self.catalog.raw_to_structured(&raw)
    }

    /// Writes structured values, optionally diffing against `old_values` so
    /// only changed parameters are transmitted.
    pub async fn set_full_parameters(
        &self,
        device: &DeviceId,
        values: &HashMap<String, ParamValue>,
        old_values: Option<&HashMap<String, ParamValue>>,
    ) -> Result<()> {
        let mut raw = self.catalog.structured_to_raw(values)?;
        if let Some(old_values) = old_values {
            let old_raw = self.catalog.structured_to_raw(old_values)?;
            raw.retain(|id, value| old_raw.get(id) != Some(&*value));
        }

        // Deterministic transmit order regardless of map iteration.
        let mut pairs: Vec<(u16, String)> = raw.into_iter().collect();
        pairs.sort_unstable_by_key(|(id, _)| *id);
        self.set_raw_parameters(device, &pairs).await
    }

    /// Retries one batch operation; non-retryable errors (timeouts,
    /// reconciliation failures) propagate immediately.
    async fn retry_batch<F, Fut, R>(&self, device: &DeviceId, batch_nr: usize, op: F) -> Result<R>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let attempts = self.config.attempts_per_batch.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            if last_err.is_some() {
                warn!(%device, batch = batch_nr + 1, attempt, attempts, "retrying batch");
            }
            match op().await {
                Ok(result) => return Ok(result),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| TrackError::transport("no batch attempt was made")))
    }

    async fn get_batch(&self, device: &DeviceId, ids: &[u16]) -> Result<HashMap<u16, String>> {
        let command = format!(
            "getparam {}",
            ids.iter().map(u16::to_string).collect::<Vec<_>>().join(";")
        );
        let response = self.transport.run_command(device, &command).await?;
        let params = parse_get_response(&response)?;
        reconcile(ids, &params)?;
        Ok(params)
    }

    async fn set_batch(&self, device: &DeviceId, values: &[(u16, String)]) -> Result<()> {
        let command = format!(
            "setparam {}",
            values
                .iter()
                .map(|(id, value)| format!("{id}:{value}"))
                .collect::<Vec<_>>()
                .join(";")
        );
        // Only success/failure of the command matters; the body is an
        // acknowledgement sentence, not data.
        self.transport.run_command(device, &command).await?;
        Ok(())
    }
}

/// Parses a `getparam` response.
///
/// The first field carries a long-form prefix, the rest are bare pairs:
///
/// ```text
/// Param ID:1000 Value:300;10000:60;10050:120
/// ```
fn parse_get_response(response: &str) -> Result<HashMap<u16, String>> {
    let mut fields = response.split(';');
    let first = fields.next().unwrap_or_default();

    let mut params = HashMap::new();

    let rest = first
        .strip_prefix("Param ID:")
        .ok_or_else(|| TrackError::response_parse(first, "missing Param ID: prefix"))?;
    let (id, value) = rest
        .split_once(' ')
        .ok_or_else(|| TrackError::response_parse(first, "missing value separator"))?;
    let value = value
        .strip_prefix("Value:")
        .ok_or_else(|| TrackError::response_parse(first, "missing Value: prefix"))?;
    let id: u16 = id
        .parse()
        .map_err(|_| TrackError::response_parse(first, "parameter id is not a number"))?;
    params.insert(id, value.to_owned());

    for field in fields {
        let (id, value) = field
            .split_once(':')
            .ok_or_else(|| TrackError::response_parse(field, "missing ':' separator"))?;
        let id: u16 = id
            .parse()
            .map_err(|_| TrackError::response_parse(field, "parameter id is not a number"))?;
        params.insert(id, value.to_owned());
    }

    Ok(params)
}

/// Checks the response ids against the requested set.
///
/// Entirely disjoint sets mean the response belongs to some other request
/// and the data cannot be trusted; that is fatal. Partial mismatches are
/// common (firmware revisions drop or add ids) and only logged.
fn reconcile(requested: &[u16], received: &HashMap<u16, String>) -> Result<()> {
    let requested_set: HashSet<u16> = requested.iter().copied().collect();
    let received_set: HashSet<u16> = received.keys().copied().collect();

    if requested_set.is_disjoint(&received_set) {
        let mut requested: Vec<u16> = requested_set.into_iter().collect();
        let mut received: Vec<u16> = received_set.into_iter().collect();
        requested.sort_unstable();
        received.sort_unstable();
        return Err(TrackError::ResponseMismatch { requested, received });
    }

    let extra: Vec<u16> = received_set.difference(&requested_set).copied().collect();
    if !extra.is_empty() {
        warn!(?extra, "received parameters that weren't requested");
    }
    let missing: Vec<u16> = requested_set.difference(&received_set).copied().collect();
    if !missing.is_empty() {
        warn!(?missing, "requested parameters that weren't received");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_param_response() {
        let params = parse_get_response("Param ID:1000 Value:300").unwrap();
        assert_eq!(params, HashMap::from([(1000, "300".to_owned())]));
    }

    #[test]
    fn parses_multi_param_response() {
        let params = parse_get_response("Param ID:1000 Value:300;10000:60;10050:").unwrap();
        assert_eq!(
            params,
            HashMap::from([
                (1000, "300".to_owned()),
                (10000, "60".to_owned()),
                (10050, String::new()),
            ])
        );
    }

    #[test]
    fn value_may_contain_colons() {
        let params = parse_get_response("Param ID:2004 Value:srv.example.com;2005:10:20").unwrap();
        assert_eq!(params[&2004], "srv.example.com");
        assert_eq!(params[&2005], "10:20");
    }

    #[test]
    fn bad_first_field_names_the_field() {
        let err = parse_get_response("ID:1000 Value:300").unwrap_err();
        match err {
            TrackError::ResponseParse { field, .. } => assert_eq!(field, "ID:1000 Value:300"),
            other => panic!("expected ResponseParse, got {other:?}"),
        }
    }

    #[test]
    fn bad_rest_field_names_the_field() {
        let err = parse_get_response("Param ID:1000 Value:300;garbage").unwrap_err();
        match err {
            TrackError::ResponseParse { field, .. } => assert_eq!(field, "garbage"),
            other => panic!("expected ResponseParse, got {other:?}"),
        }
    }

    #[test]
    fn reconcile_accepts_partial_overlap() {
        let received = HashMap::from([(1, "a".to_owned()), (2, "b".to_owned())]);
        assert!(reconcile(&[1, 2, 3], &received).is_ok());
    }

    #[test]
    fn reconcile_rejects_disjoint_sets() {
        let received = HashMap::from([(3, "c".to_owned()), (4, "d".to_owned())]);
        let err = reconcile(&[1, 2], &received).unwrap_err();
        assert!(matches!(err, TrackError::ResponseMismatch { .. }));
    }
}
