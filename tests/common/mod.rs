//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use device_trust::clock::{Clock, ManualClock, SystemClock};
use device_trust::config::{GeoFencingConfig, TrustConfig};
use device_trust::device::{
    DeviceInfo, DeviceRecord, DeviceSnapshot, Location, Registration,
};
use device_trust::events::{EventFilter, EventLog, LogError, NewSecurityEvent, SecurityEvent};
use device_trust::geo::StaticGeoResolver;
use device_trust::notify::{Notifier, NotifyError};
use device_trust::store::{
    DeviceStore, StateChange, StateUpdate, StoreError, StoreStats, Touch, UpsertOutcome,
};
use device_trust::trust::{Collaborators, TrustEngine};
use device_trust::{HttpServer, Shutdown};

pub const US_IP: &str = "198.51.100.10";
pub const US_IP_2: &str = "198.51.100.11";
pub const KP_IP: &str = "175.45.176.3";
pub const CHROME: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0.0.0";

pub fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-15T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn location(country: &str, city: &str) -> Location {
    Location {
        latitude: 0.0,
        longitude: 0.0,
        country: country.into(),
        city: city.into(),
    }
}

pub fn geo() -> StaticGeoResolver {
    StaticGeoResolver::default()
        .with(ip(US_IP), location("US", "Austin"))
        .with(ip(US_IP_2), location("US", "Dallas"))
        .with(ip(KP_IP), location("KP", "Pyongyang"))
}

/// Defaults plus a geofence that blocks KP.
pub fn config() -> TrustConfig {
    let mut config = TrustConfig::default();
    config.device_tracking.suspicious_activity.geo_fencing = GeoFencingConfig {
        enabled: true,
        allowed_countries: Vec::new(),
        blocked_countries: vec!["KP".into()],
    };
    config
}

pub fn registration(device_id: &str, user_id: Option<&str>) -> Registration {
    DeviceInfo {
        session_id: Some(device_id.into()),
        user_id: user_id.map(str::to_string),
        user_agent: Some(CHROME.into()),
        platform: Some("Win32".into()),
        vendor: Some("Google Inc.".into()),
        ..DeviceInfo::default()
    }
    .validate(None)
    .unwrap()
}

/// Records every new-device notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub devices: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn new_device(&self, record: &DeviceRecord) -> Result<(), NotifyError> {
        self.devices.lock().push(record.device_id.clone());
        Ok(())
    }
}

/// A store whose backend is always down.
pub struct UnavailableStore;

#[async_trait]
impl DeviceStore for UnavailableStore {
    async fn upsert(&self, _snapshot: DeviceSnapshot) -> Result<UpsertOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn get(&self, _device_id: &str) -> Result<DeviceRecord, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn set_trust_state(&self, _change: StateChange) -> Result<StateUpdate, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn touch_last_seen(&self, _device_id: &str, _at: DateTime<Utc>) -> Result<Touch, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn devices_for_user(&self, _user_id: &str) -> Result<Vec<DeviceRecord>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// An event log that refuses every write.
pub struct UnavailableLog;

#[async_trait]
impl EventLog for UnavailableLog {
    async fn append(&self, _event: NewSecurityEvent) -> Result<SecurityEvent, LogError> {
        Err(LogError::Unavailable("disk full".into()))
    }

    async fn query(&self, _filter: &EventFilter, _limit: usize) -> Result<Vec<SecurityEvent>, LogError> {
        Err(LogError::Unavailable("disk full".into()))
    }

    async fn count(&self) -> Result<usize, LogError> {
        Err(LogError::Unavailable("disk full".into()))
    }
}

/// An engine on a manual clock with the static resolver.
pub struct Harness {
    pub engine: Arc<TrustEngine>,
    pub clock: ManualClock,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(config: TrustConfig) -> Self {
        Self::with(config, |c| c)
    }

    pub fn with(config: TrustConfig, customize: impl FnOnce(Collaborators) -> Collaborators) -> Self {
        let clock = ManualClock::new(start());
        let notifier = Arc::new(RecordingNotifier::default());
        let collaborators = Collaborators::in_memory(Arc::new(clock.clone()))
            .with_geo(Arc::new(geo()))
            .with_notifier(notifier.clone());
        let engine = Arc::new(TrustEngine::from_config(&config, customize(collaborators)));
        Self {
            engine,
            clock,
            notifier,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// A running server on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub engine: Arc<TrustEngine>,
    pub config_tx: mpsc::UnboundedSender<TrustConfig>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Serve `config` on 127.0.0.1 with the wall clock. Loopback resolves to
/// no location, so geofencing never fires here.
pub async fn spawn_server(config: TrustConfig) -> TestServer {
    let collaborators = Collaborators::in_memory(Arc::new(SystemClock)).with_geo(Arc::new(geo()));
    let server = HttpServer::new(config, collaborators);
    let engine = server.engine();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (config_tx, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    TestServer {
        addr,
        shutdown,
        engine,
        config_tx,
    }
}
