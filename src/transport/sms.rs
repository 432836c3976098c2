//! SMS transport: store-and-forward messaging with polling correlation.
//!
//! There is no push channel here. Commands go out as SMS through a messaging
//! gateway; responses land in the gateway's inbox some time later and have to
//! be fished out by polling. Correlation is by ICCID plus time: a reply must
//! arrive at or after the minute of its command's send (receive timestamps
//! come back minute-granular, so the send time is floored to absorb the
//! clock skew).
//!
//! The poller task sleeps while nothing is in flight, and wakes on the first
//! send. Messages already seen in an earlier poll are skipped by a stable
//! hash, as are messages the units did not originate.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Transport;
use super::pending::PendingCommands;
use crate::device_id::DeviceId;
use crate::error::{Result, TrackError};

/// Single-SMS payload ceiling, before the credentials prefix.
const SMS_LEN: usize = 160;

/// Who originated a message, from the gateway's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsDirection {
    /// Sent by the unit; the only direction that can carry a response.
    MobileOriginated,
    /// Sent to the unit (our own outbound traffic echoed back).
    MobileTerminated,
}

/// One message as reported by the gateway inbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmsMessage {
    pub iccid: String,
    pub content: String,
    pub direction: SmsDirection,
    pub received_at: DateTime<Utc>,
}

/// A store-and-forward SMS backend.
///
/// Implementations only move messages; all correlation lives in
/// [`SmsTransport`].
#[async_trait::async_trait]
pub trait SmsGateway: Send + Sync + 'static {
    /// Submits one outbound message to `iccid`.
    async fn send_sms(&self, iccid: &str, message: &str) -> Result<()>;

    /// Fetches the most recent batch of inbox messages, newest first.
    async fn fetch_recent(&self) -> Result<Vec<SmsMessage>>;
}

/// Configuration for [`SmsTransport`].
#[derive(Debug, Clone)]
pub struct SmsTransportConfig {
    /// Device-side SMS username, prefixed to every command.
    pub username: String,
    /// Device-side SMS password, prefixed to every command.
    pub password: String,
    /// Hard deadline for one command's response. SMS round trips are slow;
    /// this default is deliberately generous.
    pub response_timeout: Duration,
    /// Delay between inbox polls while commands are in flight.
    pub poll_interval: Duration,
}

impl Default for SmsTransportConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            response_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Polling transport over an [`SmsGateway`].
pub struct SmsTransport<G> {
    gateway: Arc<G>,
    config: SmsTransportConfig,
    pending: Arc<PendingCommands<DateTime<Utc>>>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl<G: SmsGateway> SmsTransport<G> {
    /// Creates the transport and spawns its poller task.
    pub fn new(gateway: G, config: SmsTransportConfig) -> Self {
        let gateway = Arc::new(gateway);
        let pending = PendingCommands::new();
        let wake = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        tokio::spawn(poller_task(
            Arc::clone(&gateway),
            Arc::clone(&pending),
            Arc::clone(&wake),
            config.poll_interval,
            cancel.clone(),
        ));

        Self { gateway, config, pending, wake, cancel }
    }

    /// Stops the poller task. Called automatically on drop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn command_prefix(&self) -> String {
        format!("{} {} ", self.config.username, self.config.password)
    }
}

impl<G> Drop for SmsTransport<G> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait::async_trait]
impl<G: SmsGateway> Transport for SmsTransport<G> {
    fn max_command_len(&self) -> usize {
        SMS_LEN - self.command_prefix().len()
    }

    async fn run_command(&self, device: &DeviceId, command: &str) -> Result<String> {
        let iccid = device.iccid().ok_or_else(|| TrackError::MissingDeviceId {
            device: device.to_string(),
            required: "ICCID",
        })?;

        let message = format!("{}{}", self.command_prefix(), command);

        // The gateway reports receive times with minute granularity; floor
        // the send time the same way so a reply landing in the same minute
        // is not discarded as stale.
        let sent_floor = minute_floor(Utc::now());
        let (_guard, rx) = self.pending.acquire(iccid, sent_floor)?;
        self.wake.notify_one();

        self.gateway.send_sms(iccid, &message).await?;
        debug!(iccid, "command submitted, awaiting reply");

        match tokio::time::timeout(self.config.response_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(TrackError::transport("poller task dropped the response slot")),
            Err(_elapsed) => Err(TrackError::Timeout {
                device: device.to_string(),
                timeout: self.config.response_timeout,
            }),
        }
    }
}

/// Polls the gateway inbox while any command is in flight, sleeps otherwise.
async fn poller_task<G: SmsGateway>(
    gateway: Arc<G>,
    pending: Arc<PendingCommands<DateTime<Utc>>>,
    wake: Arc<Notify>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    info!("sms poller task started");
    let mut seen: HashSet<u64> = HashSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("sms poller task stopped");
                return;
            }
            _ = wake.notified() => {}
        }

        let mut first = true;
        while !pending.is_empty() {
            if !first {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            first = false;

            if let Err(err) = poll_once(gateway.as_ref(), &pending, &mut seen).await {
                warn!(error = %err, "inbox poll failed");
            }
        }
    }
}

async fn poll_once<G: SmsGateway>(
    gateway: &G,
    pending: &PendingCommands<DateTime<Utc>>,
    seen: &mut HashSet<u64>,
) -> Result<()> {
    for message in gateway.fetch_recent().await? {
        if !seen.insert(stable_hash(&message)) {
            continue;
        }
        if message.direction != SmsDirection::MobileOriginated {
            continue;
        }
        let SmsMessage { iccid, content, received_at, .. } = message;
        let delivered =
            pending.resolve_if(&iccid, |sent_floor| received_at >= *sent_floor, Ok(content));
        if delivered {
            debug!(%iccid, "reply matched pending command");
        }
    }
    Ok(())
}

fn stable_hash(message: &SmsMessage) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.hash(&mut hasher);
    hasher.finish()
}

fn minute_floor(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(chrono::Duration::minutes(1)).unwrap_or(at)
}

/// JSON/REST gateway client.
#[derive(Debug, Clone)]
pub struct HttpSmsGatewayConfig {
    /// Gateway API root, e.g. `https://sms.example.com/api/v1`.
    pub base_url: String,
    /// Bearer token for the gateway account.
    pub api_token: String,
    /// How many inbox messages one poll requests.
    pub fetch_limit: usize,
}

impl Default for HttpSmsGatewayConfig {
    fn default() -> Self {
        Self { base_url: String::new(), api_token: String::new(), fetch_limit: 50 }
    }
}

/// [`SmsGateway`] implementation against a JSON/REST messaging API.
pub struct HttpSmsGateway {
    client: reqwest::Client,
    config: HttpSmsGatewayConfig,
}

#[derive(Serialize)]
struct OutboundSms<'a> {
    iccid: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct InboxPage {
    messages: Vec<SmsMessage>,
}

impl HttpSmsGateway {
    pub fn new(config: HttpSmsGatewayConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }
}

#[async_trait::async_trait]
impl SmsGateway for HttpSmsGateway {
    async fn send_sms(&self, iccid: &str, message: &str) -> Result<()> {
        self.client
            .post(format!("{}/messages", self.config.base_url))
            .bearer_auth(&self.config.api_token)
            .json(&OutboundSms { iccid, message })
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| TrackError::transport_with_source("sms submit failed", err))?;
        Ok(())
    }

    async fn fetch_recent(&self) -> Result<Vec<SmsMessage>> {
        let page: InboxPage = self
            .client
            .get(format!("{}/messages/inbound", self.config.base_url))
            .bearer_auth(&self.config.api_token)
            .query(&[("limit", self.config.fetch_limit)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| TrackError::transport_with_source("inbox fetch failed", err))?
            .json()
            .await
            .map_err(|err| TrackError::transport_with_source("inbox decode failed", err))?;
        Ok(page.messages)
    }
}
