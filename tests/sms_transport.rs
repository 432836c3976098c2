//! SMS transport correlation behavior against an in-memory gateway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tracklink::{
    DeviceId, Result, SmsDirection, SmsGateway, SmsMessage, SmsTransport, SmsTransportConfig,
    TrackError, Transport,
};

const ICCID: &str = "8944477100002778325";

/// Gateway stub backed by a shared in-memory inbox.
#[derive(Clone, Default)]
struct FakeGateway {
    inbox: Arc<Mutex<Vec<SmsMessage>>>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeGateway {
    fn push_reply(&self, content: &str) {
        self.inbox.lock().unwrap().push(SmsMessage {
            iccid: ICCID.to_owned(),
            content: content.to_owned(),
            direction: SmsDirection::MobileOriginated,
            // Far enough ahead that a minute boundary during the test cannot
            // make the reply look stale.
            received_at: Utc::now() + chrono::Duration::minutes(2),
        });
    }
}

#[async_trait::async_trait]
impl SmsGateway for FakeGateway {
    async fn send_sms(&self, iccid: &str, message: &str) -> Result<()> {
        self.sent.lock().unwrap().push((iccid.to_owned(), message.to_owned()));
        Ok(())
    }

    async fn fetch_recent(&self) -> Result<Vec<SmsMessage>> {
        Ok(self.inbox.lock().unwrap().clone())
    }
}

fn config(response_timeout_ms: u64) -> SmsTransportConfig {
    SmsTransportConfig {
        username: "user".to_owned(),
        password: "pass".to_owned(),
        response_timeout: Duration::from_millis(response_timeout_ms),
        poll_interval: Duration::from_millis(10),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn command_is_prefixed_and_resolved_from_inbox() {
    let gateway = FakeGateway::default();
    gateway.push_reply("Param ID:1000 Value:300");
    let transport = SmsTransport::new(gateway.clone(), config(2000));

    let device = DeviceId::from_iccid(ICCID);
    let response = transport.run_command(&device, "getparam 1000").await.unwrap();

    assert_eq!(response, "Param ID:1000 Value:300");
    assert_eq!(
        gateway.sent.lock().unwrap().clone(),
        vec![(ICCID.to_owned(), "user pass getparam 1000".to_owned())]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn max_command_len_accounts_for_credentials() {
    let transport = SmsTransport::new(FakeGateway::default(), config(100));
    // 160 minus "user pass " (10 bytes).
    assert_eq!(transport.max_command_len(), 150);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_inbox_times_out() {
    let transport = SmsTransport::new(FakeGateway::default(), config(150));

    let err = transport
        .run_command(&DeviceId::from_iccid(ICCID), "getinfo")
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_reply_from_before_the_send_is_ignored() {
    let gateway = FakeGateway::default();
    gateway.inbox.lock().unwrap().push(SmsMessage {
        iccid: ICCID.to_owned(),
        content: "OLD".to_owned(),
        direction: SmsDirection::MobileOriginated,
        received_at: Utc::now() - chrono::Duration::minutes(10),
    });
    let transport = SmsTransport::new(gateway, config(150));

    let err = transport
        .run_command(&DeviceId::from_iccid(ICCID), "getinfo")
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(flavor = "multi_thread")]
async fn our_own_outbound_echo_is_ignored() {
    let gateway = FakeGateway::default();
    gateway.inbox.lock().unwrap().push(SmsMessage {
        iccid: ICCID.to_owned(),
        content: "user pass getinfo".to_owned(),
        direction: SmsDirection::MobileTerminated,
        received_at: Utc::now() + chrono::Duration::minutes(2),
    });
    let transport = SmsTransport::new(gateway, config(150));

    let err = transport
        .run_command(&DeviceId::from_iccid(ICCID), "getinfo")
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(flavor = "multi_thread")]
async fn a_reply_only_resolves_one_command() {
    let gateway = FakeGateway::default();
    gateway.push_reply("DONE");
    let transport = SmsTransport::new(gateway.clone(), config(300));
    let device = DeviceId::from_iccid(ICCID);

    let first = transport.run_command(&device, "cpureset").await.unwrap();
    assert_eq!(first, "DONE");

    // Same inbox contents on the next poll: the message was already seen and
    // must not satisfy a second command.
    let err = transport.run_command(&device, "cpureset").await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_command_to_a_busy_device_is_rejected() {
    let transport = Arc::new(SmsTransport::new(FakeGateway::default(), config(500)));
    let device = DeviceId::from_iccid(ICCID);

    let background = {
        let transport = Arc::clone(&transport);
        let device = device.clone();
        tokio::spawn(async move { transport.run_command(&device, "getinfo").await })
    };

    // Give the first command time to claim its slot.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = transport.run_command(&device, "getinfo").await.unwrap_err();
    assert!(matches!(err, TrackError::CommandInFlight { .. }));

    let first = background.await.unwrap();
    assert!(first.unwrap_err().is_timeout());
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_iccid_is_rejected_up_front() {
    let transport = SmsTransport::new(FakeGateway::default(), config(100));

    let err = transport
        .run_command(&DeviceId::from_imei("356307042441013"), "getinfo")
        .await
        .unwrap_err();
    assert!(matches!(err, TrackError::MissingDeviceId { required: "ICCID", .. }));
}
