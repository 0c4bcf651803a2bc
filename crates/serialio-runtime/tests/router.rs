mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Rig, eventually, within};
use serialio_middleware::{BusClient, ConfigSource, MessageBus};
use serialio_runtime::{Router, RouterContext, RouterState};
use serialio_types::{BusError, ConfigError, Parity, REGISTRY_SET, SerialIoError};

const READ: &str = "serial_ports/ttyUSB0/read";
const WRITE: &str = "serial_ports/ttyUSB0/write";
const COMMAND: &str = "serial_ports/ttyUSB0/command";

#[tokio::test]
async fn open_applies_configured_settings() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    rig.config.set("ttyUSB0", "baud_rate", "9600");
    rig.config.set("ttyUSB0", "parity", "Odd");
    rig.config.set("ttyUSB0", "stop_bits", "bogus");

    let router = Router::open(rig.context(), "ttyUSB0").await.unwrap();

    assert_eq!(router.state(), RouterState::Online);
    assert!(router.is_alive());
    assert_eq!(router.path(), "/dev/ttyUSB0");
    assert_eq!(router.settings().baud_rate, 9600);
    assert_eq!(router.settings().parity, Parity::Odd);
    assert_eq!(device.settings().unwrap(), *router.settings());
    assert!(device.is_open());
}

#[tokio::test]
async fn open_fails_for_missing_device() {
    let rig = Rig::new();
    let result = Router::open(rig.context(), "ttyUSB0").await;
    assert!(matches!(result, Err(SerialIoError::Device(_))));
    assert_eq!(rig.bus.subscriber_count(WRITE), 0);
}

struct OfflineConfig;

#[async_trait]
impl ConfigSource for OfflineConfig {
    async fn get(&self, _device: &str, _key: &str) -> Result<Option<String>, ConfigError> {
        Err(ConfigError::Unreachable("connection refused".into()))
    }
}

#[tokio::test]
async fn open_fails_when_configuration_is_unreachable() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    let ctx = RouterContext {
        config: Arc::new(OfflineConfig),
        ..rig.context()
    };

    let result = Router::open(ctx, "ttyUSB0").await;
    assert!(matches!(result, Err(SerialIoError::Config(_))));
    assert_eq!(device.open_count(), 0);
}

#[tokio::test]
async fn open_fails_and_releases_device_when_bus_is_down() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    rig.bus.set_connected(false);

    let result = Router::open(rig.context(), "ttyUSB0").await;
    assert!(matches!(result, Err(SerialIoError::Bus(_))));
    assert_eq!(device.open_count(), 1);
    assert!(!device.is_open());
}

#[tokio::test]
async fn writes_reach_device_verbatim_and_in_order() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    let _router = Router::open(rig.context(), "ttyUSB0").await.unwrap();

    rig.bus.publish(WRITE, b"AT").await.unwrap();
    rig.bus.publish(WRITE, &[0x00, 0xff]).await.unwrap();
    rig.bus.publish(WRITE, b"\r\n").await.unwrap();

    let expected = vec![b'A', b'T', 0x00, 0xff, b'\r', b'\n'];
    eventually("all writes", || device.written() == expected).await;
}

#[tokio::test]
async fn each_read_event_becomes_one_message() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    let mut reads = rig.bus.subscribe(READ).await.unwrap();
    let _router = Router::open(rig.context(), "ttyUSB0").await.unwrap();

    device.inject(b"first");
    device.inject(&[0x80, 0x81]);

    assert_eq!(within("first chunk", reads.recv()).await.unwrap(), b"first".to_vec());
    assert_eq!(within("second chunk", reads.recv()).await.unwrap(), vec![0x80, 0x81]);
}

#[tokio::test]
async fn reads_are_dropped_while_bus_is_down() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    let mut reads = rig.bus.subscribe(READ).await.unwrap();
    let _router = Router::open(rig.context(), "ttyUSB0").await.unwrap();

    rig.bus.set_connected(false);
    device.inject(b"lost");
    tokio::time::sleep(Duration::from_millis(100)).await;
    rig.bus.set_connected(true);
    device.inject(b"kept");

    assert_eq!(within("chunk after reconnect", reads.recv()).await.unwrap(), b"kept".to_vec());
    assert!(
        tokio::time::timeout(Duration::from_millis(50), reads.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn unknown_commands_are_ignored() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    let router = Router::open(rig.context(), "ttyUSB0").await.unwrap();

    rig.bus.publish(COMMAND, b"Shutdown").await.unwrap();
    rig.bus.publish(COMMAND, b"reset").await.unwrap();
    rig.bus.publish(WRITE, b"still here").await.unwrap();

    eventually("write after unknown commands", || device.written() == b"still here").await;
    assert!(router.is_alive());
    assert_eq!(router.state(), RouterState::Online);
}

#[tokio::test]
async fn shutdown_stops_bridging_and_closes_device() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    let mut reads = rig.bus.subscribe(READ).await.unwrap();
    let router = Router::open(rig.context(), "ttyUSB0").await.unwrap();

    rig.bus.publish(COMMAND, b"shutdown").await.unwrap();
    within("router closed", router.wait_closed()).await;

    assert!(!router.is_alive());
    assert_eq!(router.state(), RouterState::Closed);
    assert!(!device.is_open());
    eventually("write unsubscribed", || rig.bus.subscriber_count(WRITE) == 0).await;
    eventually("command unsubscribed", || rig.bus.subscriber_count(COMMAND) == 0).await;

    rig.bus.publish(WRITE, b"ignored").await.unwrap();
    device.inject(b"ignored");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(device.written().is_empty());
    assert!(
        tokio::time::timeout(Duration::from_millis(50), reads.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn lost_subscription_takes_router_offline() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    let router = Router::open(rig.context(), "ttyUSB0").await.unwrap();
    assert_eq!(router.failure(), None);

    rig.bus.drop_subscriptions();
    within("router closed", router.wait_closed()).await;

    assert!(!router.is_alive());
    assert_eq!(router.state(), RouterState::Closed);
    assert!(matches!(router.failure(), Some(BusError::SubscriptionLost(_))));
    assert!(!device.is_open());

    // Nothing is listening any more; the write must not reach the device.
    rig.bus.publish(WRITE, b"after-blip").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(device.written().is_empty());
}

#[tokio::test]
async fn orderly_shutdown_reports_no_failure() {
    let rig = Rig::new();
    rig.opener.add_device("/dev/ttyUSB0");
    let router = Router::open(rig.context(), "ttyUSB0").await.unwrap();

    rig.bus.publish(COMMAND, b"shutdown").await.unwrap();
    within("router closed", router.wait_closed()).await;
    assert_eq!(router.failure(), None);
}

#[tokio::test]
async fn clients_talk_to_device_through_router() {
    let rig = Rig::new();
    let device = rig.opener.add_device("/dev/ttyUSB0");
    rig.bus.set_add(REGISTRY_SET, "ttyUSB0").await.unwrap();
    let _router = Router::open(rig.context(), "ttyUSB0").await.unwrap();

    let bus: Arc<dyn MessageBus> = Arc::new(rig.bus.clone());
    let mut first = BusClient::connect(Arc::clone(&bus), "ttyUSB0").await.unwrap();
    let mut second = BusClient::connect(bus, "ttyUSB0").await.unwrap();

    first.send_text("ping\u{00b0}").await.unwrap();
    eventually("text write", || device.written() == b"ping\xb0").await;

    device.inject(b"pong");
    assert_eq!(within("first client", first.recv()).await.unwrap(), b"pong".to_vec());
    assert_eq!(within("second client", second.recv()).await.unwrap(), b"pong".to_vec());
}
