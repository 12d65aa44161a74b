mod common;

use common::rig;
use tokio_test::{assert_err, assert_ok};
use thingy_bridge::error::BridgeError;
use thingy_bridge::protocol::{sensor, ConfigGroup};
use thingy_bridge::sink::{SinkRef, SinkValue};

#[tokio::test]
async fn led_toggle_connects_on_demand() {
    let r = rig();
    let trigger = SinkRef::new("n3:led");
    r.host.user_write("n3:led", 1.0);

    assert!(assert_ok!(r.bridge.commands().toggle_led(&trigger, 3).await));
    assert_eq!(r.transport.connect_count(), 1);
    r.host.user_write("n3:led", 1.0);
    assert!(assert_ok!(r.bridge.commands().toggle_led(&trigger, 3).await));

    let sent = r.transport.commands();
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[0][..2], &[2, 1]);
    assert_eq!(&sent[1][..2], &[2, 0]);
    assert_eq!(r.host.value("n3:led"), Some(SinkValue::Number(0.0)));

    r.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_command_still_resets_trigger() {
    let r = rig();
    r.transport.fail_next_connects(1, "no aggregator");
    r.host.user_write("n1:cfg_read", 1.0);

    let err = assert_err!(
        r.bridge
            .commands()
            .read_config(&SinkRef::new("n1:cfg_read"), 1, ConfigGroup::Motion)
            .await
    );
    assert_eq!(err, BridgeError::TransportConnect("no aggregator".to_string()));
    assert_eq!(r.host.value("n1:cfg_read"), Some(SinkValue::Number(0.0)));
    assert!(r.transport.commands().is_empty());
}

#[tokio::test]
async fn config_read_addresses_node_slot() {
    let r = rig();
    r.host.user_write("n7:env_read", 1.0);
    assert!(r
        .bridge
        .commands()
        .read_config(&SinkRef::new("n7:env_read"), 7, ConfigGroup::Environment)
        .await
        .unwrap());
    assert_eq!(r.transport.commands(), vec![vec![6, 7]]);

    r.bridge.shutdown().await.unwrap();
}

#[tokio::test]
async fn composite_write_aborts_on_missing_field() {
    let r = rig();
    r.register(2, sensor::TEMP_INTERVAL, "n2:ti");
    r.register(2, sensor::PRESSURE_INTERVAL, "n2:pi");
    r.register(2, sensor::HUMID_INTERVAL, "n2:hi");
    r.host.user_write("n2:ti", 1000.0);
    r.host.user_write("n2:pi", 1000.0);
    r.host.user_write("n2:hi", 1000.0);
    r.host.user_write("n2:env_write", 1.0);

    let err = r
        .bridge
        .commands()
        .write_config(&SinkRef::new("n2:env_write"), 2, ConfigGroup::Environment)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::SinkNotFound {
            node: 2,
            sensor: sensor::GAS_MODE
        }
    );
    assert!(r.transport.commands().is_empty());
    assert_eq!(r.host.value("n2:env_write"), Some(SinkValue::Number(0.0)));
}

#[tokio::test]
async fn confirmed_config_flows_back_into_sinks() {
    let r = rig();
    r.register(2, sensor::TEMP_INTERVAL, "n2:ti");
    r.register(2, sensor::GAS_MODE, "n2:gm");
    r.bridge.readiness().signal();
    r.bridge.start().await.unwrap();
    r.transport.wait_for_subscriptions(1).await;

    // ENV_CONFIG: three u16 intervals then the gas mode
    r.transport
        .inject(&[11, 0, 2, 0xE8, 0x03, 0xD0, 0x07, 0xB8, 0x0B, 2]);
    common::eventually("config delivered", || {
        r.host.value("n2:ti") == Some(SinkValue::Number(1000.0))
    })
    .await;
    assert_eq!(r.host.value("n2:gm"), Some(SinkValue::Number(2.0)));

    r.bridge.shutdown().await.unwrap();
}
