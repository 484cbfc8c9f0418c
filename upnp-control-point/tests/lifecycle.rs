//! Lifecycle transitions and listener registration.

mod helpers;

use std::sync::Arc;

use helpers::*;
use rstest::rstest;
use upnp_control_point::{ControlPointConfig, ControlPointError, Device, DiscoveryListener, LifecycleState};

#[test]
fn test_start_initializes_implicitly() {
    let harness = Harness::new(ControlPointConfig::fast_polling());
    assert_eq!(harness.control_point.state(), LifecycleState::Uninitialized);

    harness.control_point.start().unwrap();

    assert_eq!(harness.control_point.state(), LifecycleState::Started);
    assert!(harness.ssdp.is_running());
}

#[test]
fn test_initialize_is_idempotent() {
    let harness = Harness::new(ControlPointConfig::fast_polling());

    harness.control_point.initialize().unwrap();
    harness.control_point.initialize().unwrap();

    assert_eq!(harness.control_point.state(), LifecycleState::Initialized);
}

#[rstest]
#[case::uninitialized(false, false)]
#[case::stopped(true, true)]
fn test_search_requires_started(#[case] start: bool, #[case] stop: bool) {
    let harness = Harness::new(ControlPointConfig::fast_polling());
    if start {
        harness.control_point.start().unwrap();
    }
    if stop {
        harness.control_point.stop();
    }

    let result = harness.control_point.search(None);

    assert!(matches!(
        result,
        Err(ControlPointError::InvalidState { operation: "search", .. })
    ));
    assert!(harness.ssdp.searches().is_empty());
}

#[test]
fn test_search_targets() {
    let harness = Harness::started();

    harness.control_point.search(None).unwrap();
    harness
        .control_point
        .search(Some("urn:schemas-upnp-org:device:MediaRenderer:1"))
        .unwrap();

    assert_eq!(
        harness.ssdp.searches(),
        vec!["ssdp:all", "urn:schemas-upnp-org:device:MediaRenderer:1"]
    );
}

#[test]
fn test_stop_loses_devices_and_allows_restart() {
    let harness = Harness::started();
    harness.discover_renderer();

    harness.control_point.stop();

    assert_eq!(harness.control_point.state(), LifecycleState::Stopped);
    assert_eq!(harness.discovery.expect_lost(), ROOT_UDN);
    assert_eq!(harness.control_point.device_list_size(), 0);
    assert!(!harness.ssdp.is_running());

    harness.control_point.start().unwrap();
    assert_eq!(harness.control_point.state(), LifecycleState::Started);
    harness.discover_renderer();
}

#[test]
fn test_terminate_is_final_and_idempotent() {
    let harness = Harness::started();

    harness.control_point.terminate();
    harness.control_point.terminate();

    assert_eq!(harness.control_point.state(), LifecycleState::Terminated);
    assert!(matches!(
        harness.control_point.start(),
        Err(ControlPointError::InvalidState { operation: "start", .. })
    ));
    assert!(matches!(
        harness.control_point.initialize(),
        Err(ControlPointError::InvalidState { operation: "initialize", .. })
    ));
    assert!(harness.control_point.search(None).is_err());
}

#[test]
fn test_terminate_from_listener_callback() {
    let harness = Harness::started();
    let control_point = Arc::new(harness.control_point);

    struct Terminator(std::sync::Weak<upnp_control_point::ControlPoint>);

    impl DiscoveryListener for Terminator {
        fn on_discover(&self, _device: &Arc<Device>) {
            if let Some(control_point) = self.0.upgrade() {
                control_point.terminate();
            }
        }

        fn on_lost(&self, _device: &Arc<Device>) {}
    }

    control_point.add_discovery_listener(Arc::new(Terminator(Arc::downgrade(&control_point))));
    harness.ssdp.deliver(alive(ROOT_UDN, &location(DEVICE_HOST)));

    wait_until("terminated", || control_point.state() == LifecycleState::Terminated);
}

#[test]
fn test_listener_registration() {
    let harness = Harness::new(ControlPointConfig::fast_polling());
    let listener: Arc<dyn DiscoveryListener> = RecordingListener::new();

    assert!(harness.control_point.add_discovery_listener(listener.clone()));
    assert!(!harness.control_point.add_discovery_listener(listener.clone()));
    assert!(harness.control_point.remove_discovery_listener(&listener));
    assert!(!harness.control_point.remove_discovery_listener(&listener));
}

#[test]
fn test_removed_listener_is_not_called() {
    let harness = Harness::started();
    let listener: Arc<dyn DiscoveryListener> = harness.discovery.clone();
    assert!(harness.control_point.remove_discovery_listener(&listener));

    harness.ssdp.deliver(alive(ROOT_UDN, &location(DEVICE_HOST)));
    wait_until("device registered", || harness.control_point.device_list_size() == 1);

    harness.discovery.expect_quiet(std::time::Duration::from_millis(200));
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = ControlPointConfig {
        io_workers: 0,
        ..ControlPointConfig::fast_polling()
    };

    let result = upnp_control_point::ControlPoint::new(config);

    assert!(matches!(result, Err(ControlPointError::Config(_))));
}
