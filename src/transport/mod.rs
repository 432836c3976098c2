//! Transports that carry commands to units and responses back.
//!
//! A transport owns the request/response correlation for its channel. The
//! two implementations solve that under different models: the MQTT transport
//! matches responses pushed to per-device topics, the SMS transport polls a
//! store-and-forward gateway. They share the [`Transport`] trait and the
//! pending-slot plumbing, and no state.

mod mqtt;
mod pending;
mod sms;

pub use mqtt::{MqttTransport, MqttTransportConfig};
pub use sms::{HttpSmsGateway, HttpSmsGatewayConfig, SmsDirection, SmsGateway, SmsMessage, SmsTransport, SmsTransportConfig};

use crate::device_id::DeviceId;
use crate::error::Result;

/// A channel that can run one text command against one device at a time.
///
/// `run_command` resolves with the device's response text, or fails with
/// [`TrackError::Timeout`](crate::TrackError::Timeout) when no correlated
/// response arrives within the transport's deadline. Timeouts are hard
/// per-command deadlines; transports never retry internally, retry policy
/// belongs to [`CommandClient`](crate::CommandClient).
///
/// Dropping the returned future releases the device's correlation slot, so a
/// cancelled call never wedges the device.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Ceiling on a single outgoing command's text length.
    ///
    /// The command client sizes its parameter batches against this.
    fn max_command_len(&self) -> usize;

    /// Sends `command` to `device` and awaits the correlated response text.
    async fn run_command(&self, device: &DeviceId, command: &str) -> Result<String>;
}
