//! Async client for querying and configuring GPS tracking units.
//!
//! Tracklink speaks the units' binary frame protocol and text command
//! grammar, and drives batched parameter reads/writes over whichever channel
//! can currently reach a device: the broker push channel (MQTT) or plain SMS
//! through a messaging gateway.
//!
//! # Layers
//!
//! - [`codec`]: the CRC-checked wire envelope, text command payloads, and
//!   multi-record AVL telemetry payloads.
//! - [`batcher`]: packs long parameter lists into transport-sized commands.
//! - [`CommandClient`]: batched get/set with retry and request/response
//!   reconciliation.
//! - [`Transport`]: the channel abstraction; [`MqttTransport`] correlates
//!   over per-device pub/sub topics, [`SmsTransport`] by polling a
//!   store-and-forward inbox.
//!
//! # Example
//!
//! ```rust,no_run
//! use rumqttc::MqttOptions;
//! use tracklink::{CommandClient, DeviceId, MqttTransport, MqttTransportConfig};
//!
//! # use std::collections::HashMap;
//! # use tracklink::{ParamValue, ParameterCatalog};
//! # struct Catalog;
//! # impl ParameterCatalog for Catalog {
//! #     fn parameter_ids(&self) -> Vec<u16> { Vec::new() }
//! #     fn max_raw_len(&self, _id: u16) -> Option<usize> { Some(32) }
//! #     fn raw_to_structured(
//! #         &self,
//! #         _raw: &HashMap<u16, String>,
//! #     ) -> tracklink::Result<HashMap<String, ParamValue>> { Ok(HashMap::new()) }
//! #     fn structured_to_raw(
//! #         &self,
//! #         _values: &HashMap<String, ParamValue>,
//! #     ) -> tracklink::Result<HashMap<u16, String>> { Ok(HashMap::new()) }
//! # }
//! #[tokio::main]
//! async fn main() -> tracklink::Result<()> {
//!     let options = MqttOptions::new("tracklink", "broker.example.com", 1883);
//!     let transport = MqttTransport::connect(options, MqttTransportConfig::default())?;
//!     let client = CommandClient::new(transport, Catalog);
//!
//!     let device = DeviceId::from_imei("356307042441013");
//!     let params = client.get_raw_parameters(&device, &[10000, 10050]).await?;
//!     println!("{params:?}");
//!     Ok(())
//! }
//! ```

pub mod batcher;
pub mod codec;
mod client;
mod device_id;
mod error;
pub mod params;
pub mod transport;

pub use client::{ClientConfig, CommandClient};
pub use codec::CodecError;
pub use codec::command::{CommandDirection, TextCommand};
pub use codec::frame::{CodecId, MessageFrame};
pub use codec::telemetry::{AvlRecord, GpsBlock, IoMap, TelemetryBatch};
pub use device_id::DeviceId;
pub use error::{Result, TrackError};
pub use params::{ParamValue, ParameterCatalog};
pub use transport::{
    HttpSmsGateway, HttpSmsGatewayConfig, MqttTransport, MqttTransportConfig, SmsDirection,
    SmsGateway, SmsMessage, SmsTransport, SmsTransportConfig, Transport,
};
