mod common;

use common::{disconnect, rig, temperature};
use thingy_bridge::dispatch::Dispatcher;
use thingy_bridge::protocol::sensor;
use thingy_bridge::sink::SinkValue;

#[test]
fn silent_node_is_nullified_exactly_once() {
    let r = rig();
    r.register(3, sensor::TEMPERATURE, "n3:temp");
    r.register(3, sensor::HUMIDITY, "n3:humidity");
    r.register(3, sensor::STATUS, "n3:status");
    r.register(3, sensor::CONNECTION, "n3:conn");
    let watchdog = r.bridge.watchdog().clone();
    let dispatch = Dispatcher::new(watchdog.clone());

    dispatch.handle(&temperature(3, 22, 0));
    dispatch.handle(&[9, 0, 3, 40]);
    let temp_writes = r.host.write_count("n3:temp");

    // first heartbeat only clears the alive mark
    assert!(watchdog.tick().is_empty());
    assert_eq!(watchdog.tick(), vec![3]);
    assert_eq!(r.host.value("n3:temp"), Some(SinkValue::Number(0.0)));
    assert_eq!(r.host.value("n3:humidity"), Some(SinkValue::Number(0.0)));
    assert_eq!(r.host.value("n3:status"), Some(SinkValue::from("DISCONNECTED")));
    assert_eq!(r.host.write_count("n3:temp"), temp_writes + 1);

    // further heartbeats and a late disconnect notice change nothing
    assert!(watchdog.tick().is_empty());
    assert!(watchdog.tick().is_empty());
    dispatch.handle(&disconnect(3));
    assert_eq!(r.host.write_count("n3:temp"), temp_writes + 1);
}

#[test]
fn traffic_between_heartbeats_keeps_node_alive() {
    let r = rig();
    r.register(6, sensor::TEMPERATURE, "n6:temp");
    let watchdog = r.bridge.watchdog().clone();
    let dispatch = Dispatcher::new(watchdog.clone());

    for _ in 0..5 {
        dispatch.handle(&temperature(6, 18, 0));
        assert!(watchdog.tick().is_empty());
    }
    assert_eq!(r.host.value("n6:temp"), Some(SinkValue::Number(18.0)));
}

#[test]
fn recovery_restores_status_then_next_outage_nullifies_again() {
    let r = rig();
    r.register(2, sensor::TEMPERATURE, "n2:temp");
    r.register(2, sensor::STATUS, "n2:status");
    let watchdog = r.bridge.watchdog().clone();
    let dispatch = Dispatcher::new(watchdog.clone());

    dispatch.handle(&temperature(2, 10, 0));
    watchdog.tick();
    assert_eq!(watchdog.tick(), vec![2]);

    dispatch.handle(&temperature(2, 11, 0));
    assert_eq!(r.host.value("n2:status"), Some(SinkValue::from("CONNECTED")));
    assert_eq!(r.host.value("n2:temp"), Some(SinkValue::Number(11.0)));

    watchdog.tick();
    assert_eq!(watchdog.tick(), vec![2]);
    assert_eq!(r.host.value("n2:temp"), Some(SinkValue::Number(0.0)));
}

#[test]
fn slots_without_sinks_are_not_watched() {
    let r = rig();
    let watchdog = r.bridge.watchdog().clone();
    let dispatch = Dispatcher::new(watchdog.clone());
    dispatch.handle(&temperature(8, 10, 0));
    watchdog.tick();
    assert!(watchdog.tick().is_empty());
}

#[test]
fn frames_with_unparsed_opcodes_still_count_as_traffic() {
    let r = rig();
    r.register(3, sensor::TEMPERATURE, "n3:temp");
    let watchdog = r.bridge.watchdog().clone();
    let dispatch = Dispatcher::new(watchdog.clone());

    dispatch.handle(&temperature(3, 22, 0));
    assert!(watchdog.tick().is_empty());
    dispatch.handle(&[0x5A, 0, 3, 1, 2, 3]);
    assert!(watchdog.tick().is_empty());
    // too short for a temperature, but it names node 3
    dispatch.handle(&[7, 0, 3]);
    assert!(watchdog.tick().is_empty());
    assert_eq!(r.host.value("n3:temp"), Some(SinkValue::Number(22.0)));
}
