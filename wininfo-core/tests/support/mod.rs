#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use serde_json::json;

use wininfo_core::detect::{ExternalLocator, LocatorOutput, ProbeDirectory};
use wininfo_core::service::DeviceProbe;
use wininfo_core::types::SubscriptionId;
use wininfo_core::watch::{
    WatchAction, WatchEvent, WatchRequest, WatchService, WatchSubscription,
};
use wininfo_core::{Candidate, CandidateKind, InfoError, Result};

/// In-memory watch transport that records every call and lets tests push
/// events into live subscriptions.
#[derive(Default)]
pub struct FakeWatchService {
    subscriptions: Mutex<HashMap<SubscriptionId, (WatchRequest, UnboundedSender<WatchEvent>)>>,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    fail_subscribe: AtomicBool,
    fail_unsubscribe: AtomicBool,
}

impl FakeWatchService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .flat_map(|(request, _)| request.paths.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    /// Deliver `action` on `path` to every subscription watching exactly
    /// `path`. Returns how many subscriptions received it.
    pub fn emit(&self, action: WatchAction, path: &Path) -> usize {
        let subscriptions = self.subscriptions.lock().unwrap();
        let mut delivered = 0;
        for (request, tx) in subscriptions.values() {
            if request.paths.iter().any(|watched| watched == path)
                && tx.unbounded_send(WatchEvent::new(action, path)).is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop every subscription watching `path` on the transport side, ending
    /// its event stream. Returns how many were dropped.
    pub fn end_streams(&self, path: &Path) -> usize {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|_, (request, _)| !request.paths.iter().any(|p| p == path));
        before - subscriptions.len()
    }
}

#[async_trait]
impl WatchService for FakeWatchService {
    async fn subscribe(&self, request: WatchRequest) -> Result<WatchSubscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(InfoError::WatchSubscription("subscribe refused".into()));
        }
        let id = SubscriptionId::new();
        let (tx, rx) = unbounded();
        self.subscriptions.lock().unwrap().insert(id, (request, tx));
        Ok(WatchSubscription {
            id,
            events: Box::pin(rx),
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(InfoError::WatchSubscription("unsubscribe refused".into()));
        }
        self.subscriptions
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| InfoError::WatchSubscription(format!("unknown subscription {id}")))
    }
}

/// SDK probe that recognises whichever paths are currently marked present.
#[derive(Default)]
pub struct ScriptedSdks {
    present: Mutex<Vec<PathBuf>>,
    calls: AtomicUsize,
}

impl ScriptedSdks {
    pub fn new<P: AsRef<Path>>(present: &[P]) -> Arc<Self> {
        let sdks = Self::default();
        sdks.set_present(present);
        Arc::new(sdks)
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_present<P: AsRef<Path>>(&self, present: &[P]) {
        *self.present.lock().unwrap() = present.iter().map(|p| p.as_ref().to_path_buf()).collect();
    }

    pub fn clear(&self) {
        self.present.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProbeDirectory for ScriptedSdks {
    fn probe(&self, path: &Path) -> Result<Option<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let present = self.present.lock().unwrap();
        Ok(present.iter().any(|p| p == path).then(|| {
            Candidate::new(CandidateKind::Sdk, path, json!({ "version": "10.0.22621.0" }))
        }))
    }
}

/// Locator returning a scripted output, tracking concurrent invocations.
pub struct ScriptedLocator {
    output: Mutex<LocatorOutput>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedLocator {
    pub fn new(output: LocatorOutput) -> Arc<Self> {
        Self::with_delay(output, Duration::ZERO)
    }

    pub fn with_delay(output: LocatorOutput, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            output: Mutex::new(output),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_output(&self, output: LocatorOutput) {
        *self.output.lock().unwrap() = output;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExternalLocator for ScriptedLocator {
    async fn detect(&self) -> Result<LocatorOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.output.lock().unwrap().clone())
    }
}

/// Locator output listing `(instance id, installation path)` pairs.
pub fn instances(records: &[(&str, &str)]) -> LocatorOutput {
    let records: Vec<_> = records
        .iter()
        .map(|(id, path)| json!({ "instanceId": id, "installationPath": path }))
        .collect();
    LocatorOutput {
        exit_code: 0,
        stdout: serde_json::to_string(&records).unwrap(),
        stderr: String::new(),
    }
}

pub fn locator_failure() -> LocatorOutput {
    LocatorOutput {
        exit_code: 1,
        stdout: String::new(),
        stderr: "installer metadata unavailable".into(),
    }
}

/// Device probe that reports one device per call and counts calls.
#[derive(Default)]
pub struct CountingDevices {
    calls: AtomicUsize,
}

impl CountingDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceProbe for CountingDevices {
    async fn devices(&self, _sdk: &Candidate) -> Result<Vec<Candidate>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Candidate::with_key(
            CandidateKind::Device,
            "emulator-1",
            "emulator-1",
            json!({ "name": "Emulator" }),
        )])
    }
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
