//! Fixtures shared by the unit tests of this crate.

use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use upnp_http::{GenaResponse, HttpError};
use upnp_ssdp::{SsdpMessage, DEFAULT_MAX_AGE};

use crate::description::{parse_device_description, parse_scpd};
use crate::executor::TaskExecutor;
use crate::model::{Device, DeviceContext};
use crate::subscription::SubscriptionManager;
use crate::transport::{ActionInvoker, SubscriptionTransport};

pub(crate) const RENDERER_DESCRIPTION: &str = include_str!("../tests/fixtures/renderer_description.xml");

pub(crate) const RENDERING_CONTROL_SCPD: &str = include_str!("../tests/fixtures/rendering_control_scpd.xml");

/// Local address the fixture device was "heard" on
pub(crate) const LOCAL_ADDRESS: &str = "192.168.1.5";

pub(crate) struct NoopInvoker;

impl ActionInvoker for NoopInvoker {
    fn invoke(
        &self,
        _control_url: &str,
        _service_type: &str,
        _action: &str,
        _arguments: &[(String, String)],
    ) -> Result<Vec<(String, String)>, HttpError> {
        Ok(Vec::new())
    }
}

pub(crate) fn context() -> Arc<DeviceContext> {
    Arc::new(DeviceContext {
        subscriptions: Weak::new(),
        invoker: Arc::new(NoopInvoker),
        executor: Arc::new(TaskExecutor::new(1).unwrap()),
    })
}

pub(crate) fn context_for(manager: &Arc<SubscriptionManager>, executor: Arc<TaskExecutor>) -> Arc<DeviceContext> {
    Arc::new(DeviceContext {
        subscriptions: Arc::downgrade(manager),
        invoker: Arc::new(NoopInvoker),
        executor,
    })
}

pub(crate) fn renderer_message(location: &str) -> SsdpMessage {
    let local: IpAddr = LOCAL_ADDRESS.parse().unwrap();
    SsdpMessage::alive("uuid:renderer-1", location, DEFAULT_MAX_AGE).with_local_address(local)
}

pub(crate) fn build_renderer(location: &str) -> (Arc<Device>, Arc<DeviceContext>) {
    let context = context();
    (build_renderer_with(location, context.clone()), context)
}

pub(crate) fn build_renderer_with(location: &str, context: Arc<DeviceContext>) -> Arc<Device> {
    let document = parse_device_description(RENDERER_DESCRIPTION).unwrap();
    let mut builder = document.device.unwrap();
    for service in &mut builder.service_list.services {
        service.scpd = Some(parse_scpd(RENDERING_CONTROL_SCPD).unwrap());
        service.scpd_xml = Some(RENDERING_CONTROL_SCPD.to_string());
    }
    builder.validate(Some("uuid:renderer-1")).unwrap();
    builder.build(
        document.url_base,
        renderer_message(location),
        Arc::from(RENDERER_DESCRIPTION),
        &context,
    )
}

#[derive(Debug, Clone)]
pub(crate) struct GenaCall {
    pub method: &'static str,
    pub url: String,
    pub callback: Option<String>,
    pub sid: Option<String>,
}

/// Subscription transport answering every request with one canned response
pub(crate) struct RecordingGena {
    response: Mutex<GenaResponse>,
    calls: Mutex<Vec<GenaCall>>,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

impl RecordingGena {
    pub(crate) fn granting(sid: &str, timeout: &str) -> Arc<Self> {
        Self::responding(200, Some(sid), Some(timeout))
    }

    pub(crate) fn responding(status: u16, sid: Option<&str>, timeout: Option<&str>) -> Arc<Self> {
        let gena = Arc::new(Self {
            response: Mutex::new(GenaResponse {
                status,
                sid: None,
                timeout: None,
            }),
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        });
        gena.respond_with(status, sid, timeout);
        gena
    }

    pub(crate) fn respond_with(&self, status: u16, sid: Option<&str>, timeout: Option<&str>) {
        *self.response.lock() = GenaResponse {
            status,
            sid: sid.map(str::to_string),
            timeout: timeout.map(str::to_string),
        };
    }

    pub(crate) fn calls(&self) -> Vec<GenaCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn wait_for_calls(&self, count: usize, limit: Duration) {
        let deadline = Instant::now() + limit;
        while self.calls.lock().len() < count {
            assert!(Instant::now() < deadline, "expected {count} GENA calls");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Block SUBSCRIBE requests after recording them, until [`RecordingGena::release`]
    pub(crate) fn hold(&self) {
        *self.gate.lock() = Some(channel::bounded(0));
    }

    pub(crate) fn release(&self) {
        self.gate.lock().take();
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
        let response = self.record("SUBSCRIBE", url, Some(callback_url), None);
        let gate = self.gate.lock().as_ref().map(|(_, rx)| rx.clone());
        if let Some(gate) = gate {
            // released when the sender is dropped
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        Ok(response)
    }

    fn renew(&self, url: &str, sid: &str, _timeout: Duration) -> Result<GenaResponse, HttpError> {
        Ok(self.record("RENEW", url, None, Some(sid)))
    }

    fn unsubscribe(&self, url: &str, sid: &str) -> Result<GenaResponse, HttpError> {
        Ok(self.record("UNSUBSCRIBE", url, None, Some(sid)))
    }
}
