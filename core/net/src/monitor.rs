//! Connectivity monitoring with edge-triggered change events.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::transport::{Transport, TransportRequest};
use fieldline_common::{Error, HttpMethod};

/// Physical transport of the current network link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Wifi,
    Cellular,
    Ethernet,
    Unknown,
    None,
}

/// Cellular generation reported by the platform.
///
/// Declaration order matches capability order, so floor checks can
/// compare directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellularGeneration {
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[serde(rename = "5g")]
    FiveG,
}

/// Platform-reported description of the current link.
///
/// The embedding host feeds one of these into the monitor whenever the
/// platform network API reports a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    /// Physical transport.
    pub transport: TransportType,
    /// Wireless signal strength in percent, when known.
    pub signal_percent: Option<u8>,
    /// Cellular generation, when on cellular.
    pub generation: Option<CellularGeneration>,
    /// Platform reachability hint. `None` means the platform did not say.
    pub reachable: Option<bool>,
}

impl LinkSnapshot {
    /// Snapshot for a device with no link at all.
    pub fn offline() -> Self {
        Self {
            transport: TransportType::None,
            signal_percent: None,
            generation: None,
            reachable: Some(false),
        }
    }

    /// Whether a physical link is present.
    pub fn is_connected(&self) -> bool {
        self.transport != TransportType::None
    }
}

/// Derived connectivity state. Recomputed on every snapshot, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityState {
    /// A physical link is present.
    pub connected: bool,
    /// The network is believed to reach the backend.
    pub reachable: bool,
    /// Physical transport of the link.
    pub transport: TransportType,
    /// The link clears the configured quality floors.
    pub quality_strong: bool,
}

impl ConnectivityState {
    /// State for a device with no link.
    pub fn offline() -> Self {
        Self {
            connected: false,
            reachable: false,
            transport: TransportType::None,
            quality_strong: false,
        }
    }

    /// Derive state from a snapshot under the given thresholds.
    ///
    /// Unknown reachability counts as reachable while physically
    /// connected: an absent hint must never force the engine offline.
    /// Unknown transports with a link count as strong.
    pub fn derive(snapshot: &LinkSnapshot, config: &ConnectivityConfig) -> Self {
        let connected = snapshot.is_connected();
        let reachable = connected && snapshot.reachable.unwrap_or(true);

        let quality_strong = connected
            && match snapshot.transport {
                TransportType::Wifi => snapshot
                    .signal_percent
                    .map(|s| s >= config.wifi_signal_floor_percent)
                    .unwrap_or(true),
                TransportType::Cellular => snapshot
                    .generation
                    .map(|g| g >= config.min_cellular_generation)
                    .unwrap_or(true),
                TransportType::Ethernet | TransportType::Unknown => true,
                TransportType::None => false,
            };

        Self {
            connected,
            reachable,
            transport: snapshot.transport,
            quality_strong,
        }
    }

    /// Whether live calls may be attempted.
    pub fn is_online(&self) -> bool {
        self.connected && self.reachable
    }
}

/// Edge-triggered connectivity notifications.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConnectivityEvent {
    /// Any field of the derived state changed.
    StateChanged(ConnectivityState),
    /// The device went from offline to online.
    Connected,
    /// The device went from online to offline.
    Disconnected,
    /// Quality crossed the configured floor in either direction.
    QualityChanged { strong: bool },
}

/// Thresholds and probe settings for the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// Wireless links below this signal percentage count as weak.
    pub wifi_signal_floor_percent: u8,
    /// Cellular generations below this floor count as weak.
    pub min_cellular_generation: CellularGeneration,
    /// Endpoint probed to confirm reachability.
    pub probe_endpoint: String,
    /// Probe timeout.
    pub probe_timeout: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            wifi_signal_floor_percent: 30,
            min_cellular_generation: CellularGeneration::ThreeG,
            probe_endpoint: "/health".to_string(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Tracks link state and publishes edge-triggered events.
///
/// One explicit instance owned by the engine and passed to dependents.
/// State enters through [`apply_snapshot`](Self::apply_snapshot) and
/// leaves through queries and subscriber channels. Events fire only on
/// actual transitions; repeating an identical snapshot publishes nothing.
pub struct ConnectivityMonitor {
    config: ConnectivityConfig,
    state: Mutex<ConnectivityState>,
    subscribers: Mutex<Vec<UnboundedSender<ConnectivityEvent>>>,
}

impl ConnectivityMonitor {
    /// Create a monitor that starts out offline.
    pub fn new(config: ConnectivityConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ConnectivityState::offline()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Seed the monitor with the first platform snapshot.
    pub async fn initialize(&self, snapshot: &LinkSnapshot) {
        self.apply_snapshot(snapshot).await;
    }

    /// Current derived state.
    pub async fn state(&self) -> ConnectivityState {
        *self.state.lock().await
    }

    /// Whether live calls may be attempted.
    pub async fn is_online(&self) -> bool {
        self.state().await.is_online()
    }

    /// Whether the link clears the configured quality floors.
    pub async fn has_strong_connection(&self) -> bool {
        self.state().await.quality_strong
    }

    /// Write-eligibility gate used by the queue and dispatcher.
    pub async fn can_make_requests(&self) -> bool {
        self.is_online().await
    }

    /// Online and strong enough for large uploads.
    pub async fn is_safe_for_upload(&self) -> bool {
        let state = self.state().await;
        state.is_online() && state.quality_strong
    }

    /// Subscribe to connectivity events.
    ///
    /// Dropped receivers are pruned on the next publish.
    pub async fn subscribe(&self) -> UnboundedReceiver<ConnectivityEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// Apply a platform snapshot, publishing events for each edge.
    pub async fn apply_snapshot(&self, snapshot: &LinkSnapshot) {
        let new_state = ConnectivityState::derive(snapshot, &self.config);
        self.transition_to(new_state).await;
    }

    /// Actively confirm reachability with a bounded probe.
    ///
    /// A probe failure while physically connected downgrades `reachable`
    /// and publishes the usual edges. An HTTP error still counts as
    /// reachable: the remote answered, so the path is up.
    pub async fn probe(&self, transport: &dyn Transport) -> bool {
        let request = TransportRequest::new(HttpMethod::Head, &self.config.probe_endpoint)
            .with_timeout(self.config.probe_timeout);

        let outcome = timeout(self.config.probe_timeout, transport.send(request)).await;
        let reachable = match outcome {
            Ok(Ok(_)) => true,
            Ok(Err(Error::Http { .. })) => true,
            Ok(Err(_)) => false,
            Err(_) => false,
        };

        let mut state = self.state().await;
        if state.connected && state.reachable != reachable {
            debug!(reachable, "Probe changed reachability");
            state.reachable = reachable;
            self.transition_to(state).await;
        }

        reachable
    }

    async fn transition_to(&self, new_state: ConnectivityState) {
        let old_state = {
            let mut state = self.state.lock().await;
            let old = *state;
            *state = new_state;
            old
        };

        if old_state == new_state {
            return;
        }

        let mut events = vec![ConnectivityEvent::StateChanged(new_state)];
        if !old_state.is_online() && new_state.is_online() {
            info!(transport = ?new_state.transport, "Connectivity restored");
            events.push(ConnectivityEvent::Connected);
        } else if old_state.is_online() && !new_state.is_online() {
            info!("Connectivity lost");
            events.push(ConnectivityEvent::Disconnected);
        }
        if old_state.quality_strong != new_state.quality_strong {
            events.push(ConnectivityEvent::QualityChanged {
                strong: new_state.quality_strong,
            });
        }

        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|tx| events.iter().all(|event| tx.send(*event).is_ok()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn wifi_snapshot(signal: Option<u8>) -> LinkSnapshot {
        LinkSnapshot {
            transport: TransportType::Wifi,
            signal_percent: signal,
            generation: None,
            reachable: Some(true),
        }
    }

    fn cellular_snapshot(generation: CellularGeneration) -> LinkSnapshot {
        LinkSnapshot {
            transport: TransportType::Cellular,
            signal_percent: None,
            generation: Some(generation),
            reachable: Some(true),
        }
    }

    /// Transport whose probe behavior is scripted per test.
    struct ScriptedTransport {
        behavior: ProbeBehavior,
        calls: AtomicU32,
    }

    enum ProbeBehavior {
        Ok,
        HttpError,
        NetworkError,
        Hang,
    }

    impl ScriptedTransport {
        fn new(behavior: ProbeBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _request: TransportRequest) -> fieldline_common::Result<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                ProbeBehavior::Ok => Ok(TransportResponse {
                    status: 200,
                    body: serde_json::Value::Null,
                }),
                ProbeBehavior::HttpError => Err(Error::Http {
                    status: 404,
                    message: "no health route".to_string(),
                }),
                ProbeBehavior::NetworkError => {
                    Err(Error::Network("connection refused".to_string()))
                }
                ProbeBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(TransportResponse {
                        status: 200,
                        body: serde_json::Value::Null,
                    })
                }
            }
        }
    }

    #[test]
    fn test_derive_unknown_reachability_counts_as_reachable() {
        let config = ConnectivityConfig::default();
        let snapshot = LinkSnapshot {
            transport: TransportType::Wifi,
            signal_percent: Some(80),
            generation: None,
            reachable: None,
        };

        let state = ConnectivityState::derive(&snapshot, &config);
        assert!(state.connected);
        assert!(state.reachable);
        assert!(state.is_online());
    }

    #[test]
    fn test_derive_quality_floors() {
        let config = ConnectivityConfig::default();

        let weak_wifi = ConnectivityState::derive(&wifi_snapshot(Some(10)), &config);
        assert!(!weak_wifi.quality_strong);

        let strong_wifi = ConnectivityState::derive(&wifi_snapshot(Some(75)), &config);
        assert!(strong_wifi.quality_strong);

        // Missing signal is not a weakness signal
        let unknown_signal = ConnectivityState::derive(&wifi_snapshot(None), &config);
        assert!(unknown_signal.quality_strong);

        let weak_cell =
            ConnectivityState::derive(&cellular_snapshot(CellularGeneration::TwoG), &config);
        assert!(!weak_cell.quality_strong);

        let strong_cell =
            ConnectivityState::derive(&cellular_snapshot(CellularGeneration::FourG), &config);
        assert!(strong_cell.quality_strong);
    }

    #[test]
    fn test_derive_unknown_transport_strong_when_connected() {
        let config = ConnectivityConfig::default();
        let snapshot = LinkSnapshot {
            transport: TransportType::Unknown,
            signal_percent: None,
            generation: None,
            reachable: None,
        };

        let state = ConnectivityState::derive(&snapshot, &config);
        assert!(state.quality_strong);
        assert!(state.is_online());
    }

    #[tokio::test]
    async fn test_events_fire_only_on_edges() {
        let monitor = ConnectivityMonitor::new(ConnectivityConfig::default());
        let mut events = monitor.subscribe().await;

        monitor.apply_snapshot(&wifi_snapshot(Some(80))).await;
        // Same snapshot again: no new events
        monitor.apply_snapshot(&wifi_snapshot(Some(80))).await;

        assert!(matches!(
            events.recv().await,
            Some(ConnectivityEvent::StateChanged(_))
        ));
        assert!(matches!(
            events.recv().await,
            Some(ConnectivityEvent::Connected)
        ));
        assert!(matches!(
            events.recv().await,
            Some(ConnectivityEvent::QualityChanged { strong: true })
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_edge() {
        let monitor = ConnectivityMonitor::new(ConnectivityConfig::default());
        monitor.apply_snapshot(&wifi_snapshot(Some(80))).await;
        assert!(monitor.is_online().await);

        let mut events = monitor.subscribe().await;
        monitor.apply_snapshot(&LinkSnapshot::offline()).await;

        assert!(!monitor.is_online().await);
        assert!(matches!(
            events.recv().await,
            Some(ConnectivityEvent::StateChanged(_))
        ));
        assert!(matches!(
            events.recv().await,
            Some(ConnectivityEvent::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_upload_gate_requires_strength() {
        let monitor = ConnectivityMonitor::new(ConnectivityConfig::default());

        monitor.apply_snapshot(&wifi_snapshot(Some(10))).await;
        assert!(monitor.is_online().await);
        assert!(monitor.can_make_requests().await);
        assert!(!monitor.is_safe_for_upload().await);

        monitor.apply_snapshot(&wifi_snapshot(Some(90))).await;
        assert!(monitor.is_safe_for_upload().await);
    }

    #[tokio::test]
    async fn test_probe_failure_downgrades_reachability() {
        let monitor = ConnectivityMonitor::new(ConnectivityConfig::default());
        monitor.apply_snapshot(&wifi_snapshot(Some(80))).await;

        let transport = ScriptedTransport::new(ProbeBehavior::NetworkError);
        let reachable = monitor.probe(&transport).await;

        assert!(!reachable);
        assert!(!monitor.is_online().await);
        assert!(monitor.state().await.connected);
    }

    #[tokio::test]
    async fn test_probe_http_error_still_reachable() {
        let monitor = ConnectivityMonitor::new(ConnectivityConfig::default());
        monitor.apply_snapshot(&wifi_snapshot(Some(80))).await;

        let transport = ScriptedTransport::new(ProbeBehavior::HttpError);
        assert!(monitor.probe(&transport).await);
        assert!(monitor.is_online().await);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_unreachable() {
        let config = ConnectivityConfig {
            probe_timeout: Duration::from_millis(20),
            ..ConnectivityConfig::default()
        };
        let monitor = ConnectivityMonitor::new(config);
        monitor.apply_snapshot(&wifi_snapshot(Some(80))).await;

        let transport = ScriptedTransport::new(ProbeBehavior::Hang);
        assert!(!monitor.probe(&transport).await);
        assert!(!monitor.is_online().await);
    }

    #[tokio::test]
    async fn test_probe_recovery_publishes_connected_edge() {
        let monitor = ConnectivityMonitor::new(ConnectivityConfig::default());
        monitor.apply_snapshot(&wifi_snapshot(Some(80))).await;

        let failing = ScriptedTransport::new(ProbeBehavior::NetworkError);
        monitor.probe(&failing).await;
        assert!(!monitor.is_online().await);

        let mut events = monitor.subscribe().await;
        let healthy = ScriptedTransport::new(ProbeBehavior::Ok);
        assert!(monitor.probe(&healthy).await);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);

        assert!(matches!(
            events.recv().await,
            Some(ConnectivityEvent::StateChanged(_))
        ));
        assert!(matches!(
            events.recv().await,
            Some(ConnectivityEvent::Connected)
        ));
    }
}
