//! MQTT transport: per-device command/data topics over a shared broker.
//!
//! Units subscribe to `{imei}/commands` and publish frames (command
//! responses and telemetry alike) to `{imei}/data`. A background reader task
//! drives the broker event loop, extracts the IMEI from each inbound topic,
//! and resolves the matching correlation slot. Messages with no unresolved
//! slot are dropped; they are unsolicited telemetry or stale responses.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Transport;
use super::pending::PendingCommands;
use crate::codec::CodecError;
use crate::codec::command::{CommandDirection, TextCommand};
use crate::codec::frame::{CodecId, MessageFrame};
use crate::device_id::DeviceId;
use crate::error::{Result, TrackError};

/// Documented ceiling for a single command over the push channel.
const MAX_COMMAND_LEN: usize = 500;

/// Backoff after an event-loop error before polling again (rumqttc
/// re-establishes the connection on the next poll).
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Configuration for [`MqttTransport`].
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    /// Topic the unit listens on; must contain `{imei}`.
    pub command_topic: String,
    /// Topic the unit publishes to; must contain `{imei}`.
    pub data_topic: String,
    /// Hard deadline for one command's response.
    pub response_timeout: Duration,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            command_topic: "{imei}/commands".to_owned(),
            data_topic: "{imei}/data".to_owned(),
            response_timeout: Duration::from_secs(20),
        }
    }
}

/// Pub/sub transport over an MQTT broker.
pub struct MqttTransport {
    client: AsyncClient,
    command_topic: TopicTemplate,
    data_topic: TopicTemplate,
    pending: Arc<PendingCommands>,
    subscribed: Mutex<HashSet<String>>,
    response_timeout: Duration,
    cancel: CancellationToken,
}

impl MqttTransport {
    /// Creates the transport and spawns its reader task.
    ///
    /// The broker connection is established lazily by the event loop; the
    /// first `run_command` call will ride on it.
    pub fn connect(options: MqttOptions, config: MqttTransportConfig) -> Result<Self> {
        let command_topic = TopicTemplate::parse(&config.command_topic)?;
        let data_topic = TopicTemplate::parse(&config.data_topic)?;

        let (client, event_loop) = AsyncClient::new(options, 16);
        let pending = PendingCommands::new();
        let cancel = CancellationToken::new();

        tokio::spawn(reader_task(
            event_loop,
            data_topic.clone(),
            Arc::clone(&pending),
            cancel.clone(),
        ));

        Ok(Self {
            client,
            command_topic,
            data_topic,
            pending,
            subscribed: Mutex::new(HashSet::new()),
            response_timeout: config.response_timeout,
            cancel,
        })
    }

    /// Stops the reader task. Called automatically on drop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Subscribes to the device's data topic the first time it is addressed.
    async fn ensure_subscribed(&self, imei: &str) -> Result<()> {
        let newly_added = {
            let mut subscribed = self.subscribed.lock().expect("subscription set lock poisoned");
            subscribed.insert(imei.to_owned())
        };
        if !newly_added {
            return Ok(());
        }

        let topic = self.data_topic.render(imei);
        debug!(imei, %topic, "subscribing to device data topic");
        if let Err(err) = self.client.subscribe(&topic, QoS::AtLeastOnce).await {
            self.subscribed
                .lock()
                .expect("subscription set lock poisoned")
                .remove(imei);
            return Err(TrackError::transport_with_source(
                format!("failed to subscribe to {topic}"),
                err,
            ));
        }
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait::async_trait]
impl Transport for MqttTransport {
    fn max_command_len(&self) -> usize {
        MAX_COMMAND_LEN
    }

    async fn run_command(&self, device: &DeviceId, command: &str) -> Result<String> {
        let imei = device.imei().ok_or_else(|| TrackError::MissingDeviceId {
            device: device.to_string(),
            required: "IMEI",
        })?;

        self.ensure_subscribed(imei).await?;

        // Slot released on every exit path below via the guard.
        let (_guard, rx) = self.pending.acquire(imei, ())?;

        let frame = TextCommand::request(command).to_frame();
        self.client
            .publish(self.command_topic.render(imei), QoS::AtLeastOnce, false, frame.encode())
            .await
            .map_err(|err| TrackError::transport_with_source("failed to publish command", err))?;

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(TrackError::transport("reader task dropped the response slot")),
            Err(_elapsed) => Err(TrackError::Timeout {
                device: device.to_string(),
                timeout: self.response_timeout,
            }),
        }
    }
}

/// Consumes the broker event loop for the life of the transport.
async fn reader_task(
    mut event_loop: EventLoop,
    data_topic: TopicTemplate,
    pending: Arc<PendingCommands>,
    cancel: CancellationToken,
) {
    info!("mqtt reader task started");
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("mqtt reader task stopped");
                return;
            }
            event = event_loop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let Some(imei) = data_topic.extract(&publish.topic) else {
                    debug!(topic = %publish.topic, "ignoring message on unrecognized topic");
                    continue;
                };
                match classify_inbound(&publish.payload) {
                    Ok(Some(text)) => {
                        pending.resolve(imei, Ok(text));
                    }
                    // Telemetry or request-direction traffic; not for us.
                    Ok(None) => {}
                    Err(err) => {
                        // The waiter gets the decode failure rather than
                        // running into its timeout.
                        warn!(imei, error = %err, "failed to decode inbound frame");
                        pending.resolve(imei, Err(err.into()));
                    }
                }
            }
            Ok(event) => {
                debug!(?event, "mqtt event");
            }
            Err(err) => {
                warn!(error = %err, "mqtt connection error, will reconnect");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

/// Decodes an inbound payload, returning the response text if it is a
/// response-direction command frame, `None` for other valid traffic.
fn classify_inbound(payload: &[u8]) -> Result<Option<String>, CodecError> {
    let frame = MessageFrame::decode(payload)?;
    if frame.codec_id() != CodecId::Command {
        return Ok(None);
    }
    let command = TextCommand::from_frame(&frame)?;
    if command.direction != CommandDirection::Response {
        return Ok(None);
    }
    Ok(Some(command.text))
}

/// A topic pattern with one `{imei}` placeholder.
#[derive(Debug, Clone)]
struct TopicTemplate {
    prefix: String,
    suffix: String,
}

impl TopicTemplate {
    fn parse(template: &str) -> Result<Self> {
        let (prefix, suffix) = template.split_once("{imei}").ok_or_else(|| {
            TrackError::transport(format!("topic template {template:?} must contain {{imei}}"))
        })?;
        Ok(Self { prefix: prefix.to_owned(), suffix: suffix.to_owned() })
    }

    fn render(&self, imei: &str) -> String {
        format!("{}{}{}", self.prefix, imei, self.suffix)
    }

    /// Pulls the IMEI back out of a concrete topic, if it matches.
    fn extract<'t>(&self, topic: &'t str) -> Option<&'t str> {
        topic
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())
            .filter(|imei| !imei.is_empty())
    }
}
