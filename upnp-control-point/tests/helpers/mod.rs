//! In-memory transports and fixtures for driving a control point end to end.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use upnp_control_point::{
    ActionInvoker, ControlPoint, ControlPointConfig, Device, DescriptionFetcher, DiscoveryListener, EventTransport,
    FetchError, GenaResponse, HttpError, Notification, NotificationHandler, Nts, SsdpMessage, SsdpMessageSink,
    SsdpTransport, SubscriptionTransport,
};

pub const ROOT_UDN: &str = "uuid:renderer-1";
pub const DEVICE_HOST: &str = "http://192.168.1.20:1400";
pub const LOCAL_ADDRESS: &str = "192.168.1.5";
pub const EVENT_PORT: u16 = 8058;
pub const RENDERING_CONTROL: &str = "urn:upnp-org:serviceId:RenderingControl";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests/fixtures");
    path.push(name);
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Renderer description with every UDN rewritten under `udn`
pub fn renderer_description(udn: &str) -> String {
    fixture("renderer_description.xml").replace(ROOT_UDN, udn)
}

pub fn location(host: &str) -> String {
    format!("{host}/desc.xml")
}

pub fn alive(uuid: &str, location: &str) -> SsdpMessage {
    SsdpMessage::alive(uuid, location, Duration::from_secs(1800)).with_local_address(LOCAL_ADDRESS.parse().unwrap())
}

pub fn alive_with_max_age(uuid: &str, location: &str, max_age: Duration) -> SsdpMessage {
    SsdpMessage::alive(uuid, location, max_age).with_local_address(LOCAL_ADDRESS.parse().unwrap())
}

pub fn byebye(uuid: &str) -> SsdpMessage {
    let mut message = SsdpMessage::alive(uuid, "", Duration::ZERO).with_nts(Nts::ByeBye);
    message.location = None;
    message
}

pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Serves documents from memory, counts requests and can hold a URL open
#[derive(Default)]
pub struct FakeFetcher {
    documents: Mutex<HashMap<String, Vec<u8>>>,
    counts: Mutex<HashMap<String, usize>>,
    gates: Mutex<HashMap<String, (Sender<()>, Receiver<()>)>>,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.documents.lock().insert(url.to_string(), body.into());
    }

    /// Description and SCPD of a renderer with root `udn` under `host`
    pub fn serve_renderer(&self, host: &str, udn: &str) {
        self.serve(&location(host), renderer_description(udn));
        self.serve(
            &format!("{host}/RenderingControl/scpd.xml"),
            fixture("rendering_control_scpd.xml"),
        );
    }

    /// Block fetches of `url` until [`FakeFetcher::release`]
    pub fn hold(&self, url: &str) {
        self.gates.lock().insert(url.to_string(), channel::bounded(0));
    }

    pub fn release(&self, url: &str) {
        self.gates.lock().remove(url);
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.counts.lock().get(url).copied().unwrap_or(0)
    }

    pub fn wait_for_fetch(&self, url: &str, count: usize) {
        wait_until(&format!("{count} fetches of {url}"), || self.fetch_count(url) >= count);
    }
}

impl DescriptionFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        *self.counts.lock().entry(url.to_string()).or_default() += 1;

        let gate = self.gates.lock().get(url).map(|(_, rx)| rx.clone());
        if let Some(gate) = gate {
            // released when the sender is dropped
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }

        self.documents.lock().get(url).cloned().ok_or(FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// SSDP transport whose "network" is the test itself
#[derive(Default)]
pub struct FakeSsdp {
    sink: Mutex<Option<SsdpMessageSink>>,
    searches: Mutex<Vec<String>>,
}

impl FakeSsdp {
    pub fn deliver(&self, message: SsdpMessage) {
        let sink = self.sink.lock().clone().expect("SSDP transport not started");
        sink(message);
    }

    pub fn searches(&self) -> Vec<String> {
        self.searches.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl SsdpTransport for FakeSsdp {
    fn start(&self, sink: SsdpMessageSink) -> upnp_control_point::Result<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn search(&self, search_target: &str) -> upnp_control_point::Result<()> {
        self.searches.lock().push(search_target.to_string());
        Ok(())
    }

    fn stop(&self) {
        self.sink.lock().take();
    }
}

#[derive(Default)]
pub struct FakeEvents {
    handler: Mutex<Option<Arc<dyn NotificationHandler>>>,
}

impl FakeEvents {
    /// Deliver a NOTIFY as the event receiver would; true means 200
    pub fn notify(&self, sid: &str, seq: u64, properties: &[(&str, Option<&str>)]) -> bool {
        let handler = self.handler.lock().clone().expect("event transport not started");
        handler.on_notification(Notification {
            subscription_id: sid.to_string(),
            seq,
            properties: properties
                .iter()
                .map(|(name, value)| (name.to_string(), value.map(str::to_string)))
                .collect(),
        })
    }
}

impl EventTransport for FakeEvents {
    fn start(&self, handler: Arc<dyn NotificationHandler>) -> upnp_control_point::Result<u16> {
        *self.handler.lock() = Some(handler);
        Ok(EVENT_PORT)
    }

    fn stop(&self) {
        self.handler.lock().take();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenaCall {
    pub method: &'static str,
    pub url: String,
    pub callback: Option<String>,
    pub sid: Option<String>,
}

pub struct RecordingGena {
    response: Mutex<GenaResponse>,
    calls: Mutex<Vec<GenaCall>>,
}

impl RecordingGena {
    pub fn granting(sid: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(GenaResponse {
                status: 200,
                sid: Some(sid.to_string()),
                timeout: Some("Second-300".to_string()),
            }),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<GenaCall> {
        self.calls.lock().clone()
    }

    pub fn methods(&self) -> Vec<&'static str> {
        self.calls.lock().iter().map(|call| call.method).collect()
    }

    fn record(&self, method: &'static str, url: &str, callback: Option<&str>, sid: Option<&str>) -> GenaResponse {
        self.calls.lock().push(GenaCall {
            method,
            url: url.to_string(),
            callback: callback.map(str::to_string),
            sid: sid.map(str::to_string),
        });
        self.response.lock().clone()
    }
}

impl SubscriptionTransport for RecordingGena {
    fn subscribe(&self, url: &str, callback_url: &str, _timeout: Duration) -> Result<GenaResponse, HttpError> {
        Ok(self.record("SUBSCRIBE", url, Some(callback_url), None))
    }

    fn renew(&self, url: &str, sid: &str, _timeout: Duration) -> Result<GenaResponse, HttpError> {
        Ok(self.record("RENEW", url, None, Some(sid)))
    }

    fn unsubscribe(&self, url: &str, sid: &str) -> Result<GenaResponse, HttpError> {
        Ok(self.record("UNSUBSCRIBE", url, None, Some(sid)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeCall {
    pub control_url: String,
    pub service_type: String,
    pub action: String,
    pub arguments: Vec<(String, String)>,
}

#[derive(Default)]
pub struct RecordingInvoker {
    output: Mutex<Vec<(String, String)>>,
    calls: Mutex<Vec<InvokeCall>>,
}

impl RecordingInvoker {
    pub fn returning(output: &[(&str, &str)]) -> Arc<Self> {
        let invoker = Self::default();
        *invoker.output.lock() = output
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        Arc::new(invoker)
    }

    pub fn calls(&self) -> Vec<InvokeCall> {
        self.calls.lock().clone()
    }
}

impl ActionInvoker for RecordingInvoker {
    fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(String, String)],
    ) -> Result<Vec<(String, String)>, HttpError> {
        self.calls.lock().push(InvokeCall {
            control_url: control_url.to_string(),
            service_type: service_type.to_string(),
            action: action.to_string(),
            arguments: arguments.to_vec(),
        });
        Ok(self.output.lock().clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    Found(String),
    Lost(String),
}

/// Discovery listener collecting callbacks in arrival order
pub struct RecordingListener {
    tx: Sender<Discovery>,
    rx: Receiver<Discovery>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = channel::unbounded();
        Arc::new(Self { tx, rx })
    }

    pub fn next(&self) -> Discovery {
        self.rx.recv_timeout(WAIT).expect("no discovery callback")
    }

    pub fn expect_found(&self) -> String {
        match self.next() {
            Discovery::Found(udn) => udn,
            other => panic!("expected a discovery, got {other:?}"),
        }
    }

    pub fn expect_lost(&self) -> String {
        match self.next() {
            Discovery::Lost(udn) => udn,
            other => panic!("expected a loss, got {other:?}"),
        }
    }

    /// Assert nothing arrives within `quiet`
    pub fn expect_quiet(&self, quiet: Duration) {
        if let Ok(event) = self.rx.recv_timeout(quiet) {
            panic!("unexpected callback {event:?}");
        }
    }
}

impl DiscoveryListener for RecordingListener {
    fn on_discover(&self, device: &Arc<Device>) {
        let _ = self.tx.send(Discovery::Found(device.udn().to_string()));
    }

    fn on_lost(&self, device: &Arc<Device>) {
        let _ = self.tx.send(Discovery::Lost(device.udn().to_string()));
    }
}

/// A control point wired to in-memory transports
pub struct Harness {
    pub control_point: ControlPoint,
    pub ssdp: Arc<FakeSsdp>,
    pub events: Arc<FakeEvents>,
    pub gena: Arc<RecordingGena>,
    pub invoker: Arc<RecordingInvoker>,
    pub fetcher: Arc<FakeFetcher>,
    pub discovery: Arc<RecordingListener>,
}

impl Harness {
    pub fn new(config: ControlPointConfig) -> Self {
        let ssdp = Arc::new(FakeSsdp::default());
        let events = Arc::new(FakeEvents::default());
        let gena = RecordingGena::granting("uuid:sid1");
        let invoker = RecordingInvoker::returning(&[("CurrentVolume", "35")]);
        let fetcher = FakeFetcher::new();
        fetcher.serve_renderer(DEVICE_HOST, ROOT_UDN);

        let control_point = ControlPoint::builder(config)
            .ssdp_transport(ssdp.clone())
            .event_transport(events.clone())
            .subscription_transport(gena.clone())
            .action_invoker(invoker.clone())
            .description_fetcher(fetcher.clone())
            .build()
            .expect("control point");

        let discovery = RecordingListener::new();
        assert!(control_point.add_discovery_listener(discovery.clone()));

        Self {
            control_point,
            ssdp,
            events,
            gena,
            invoker,
            fetcher,
            discovery,
        }
    }

    pub fn started() -> Self {
        let harness = Self::new(ControlPointConfig::fast_polling());
        harness.control_point.start().expect("start");
        harness
    }

    /// Announce the fixture renderer and wait until it is registered
    pub fn discover_renderer(&self) -> Arc<Device> {
        self.ssdp.deliver(alive(ROOT_UDN, &location(DEVICE_HOST)));
        assert_eq!(self.discovery.expect_found(), ROOT_UDN);
        self.control_point.device(ROOT_UDN).expect("registered renderer")
    }
}
