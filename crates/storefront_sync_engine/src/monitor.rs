//! Connection health state machine.

use crate::transport::{NetworkSignal, TransportSignal};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Transport connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport signal seen since the monitor started.
    Unknown,
    /// The transport is open.
    Open,
    /// The transport is closed or the network is unreachable.
    Closed,
}

/// Effects of one monitor transition, applied by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    /// Connection-changed notification to emit.
    pub notify: Option<bool>,
    /// Error detail to report.
    pub error: Option<String>,
    /// Whether reconnect attempts should reset to zero.
    pub reset_attempts: bool,
    /// Whether the reconnection controller should run.
    pub reconnect: bool,
}

#[derive(Debug)]
struct MonitorInner {
    state: ConnectionState,
    reachable: bool,
    running: bool,
}

/// Tracks transport signals and network reachability.
///
/// The monitor is the only component that decides whether the engine can
/// currently receive events. It does not act on its own; each signal returns
/// a [`Transition`] describing what the engine must do. Signals received
/// while stopped are ignored.
#[derive(Debug)]
pub struct ConnectionMonitor {
    inner: Mutex<MonitorInner>,
}

impl ConnectionMonitor {
    /// Creates a stopped monitor.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                state: ConnectionState::Unknown,
                reachable: true,
                running: false,
            }),
        }
    }

    /// Starts monitoring from the `Unknown` state.
    ///
    /// Reachability is preserved across restarts.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Unknown;
        inner.running = true;
    }

    /// Stops monitoring; the state becomes `Closed`.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.state = ConnectionState::Closed;
        inner.running = false;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether the local network is reachable.
    pub fn is_reachable(&self) -> bool {
        self.inner.lock().reachable
    }

    /// Whether the monitor is running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Applies a transport signal.
    pub fn on_transport(&self, signal: &TransportSignal) -> Transition {
        self.on_transport_then(signal, |_| {})
    }

    /// Applies a transport signal and runs `commit` on the result before the
    /// monitor lock is released.
    ///
    /// `commit` must not call back into the monitor.
    pub fn on_transport_then<F>(&self, signal: &TransportSignal, commit: F) -> Transition
    where
        F: FnOnce(&Transition),
    {
        let mut inner = self.inner.lock();
        let transition = transport_transition(&mut inner, signal);
        commit(&transition);
        transition
    }

    /// Applies a network reachability signal.
    pub fn on_network(&self, signal: NetworkSignal) -> Transition {
        self.on_network_then(signal, |_| {})
    }

    /// Applies a network signal and runs `commit` on the result before the
    /// monitor lock is released.
    pub fn on_network_then<F>(&self, signal: NetworkSignal, commit: F) -> Transition
    where
        F: FnOnce(&Transition),
    {
        let mut inner = self.inner.lock();
        let transition = network_transition(&mut inner, signal);
        commit(&transition);
        transition
    }
}

fn transport_transition(inner: &mut MonitorInner, signal: &TransportSignal) -> Transition {
    if !inner.running {
        debug!(?signal, "monitor stopped, ignoring transport signal");
        return Transition::default();
    }

    match signal {
        TransportSignal::Open => {
            info!("transport open");
            inner.state = ConnectionState::Open;
            Transition {
                notify: Some(true),
                reset_attempts: true,
                ..Transition::default()
            }
        }
        TransportSignal::Close | TransportSignal::Error(_) => {
            inner.state = ConnectionState::Closed;
            let error = match signal {
                TransportSignal::Error(detail) => Some(detail.clone()),
                _ => None,
            };
            info!(error = ?error, reachable = inner.reachable, "transport closed");
            Transition {
                notify: Some(false),
                error,
                reset_attempts: false,
                // An offline network reconnects from the `Online` signal instead.
                reconnect: inner.reachable,
            }
        }
    }
}

fn network_transition(inner: &mut MonitorInner, signal: NetworkSignal) -> Transition {
    match signal {
        NetworkSignal::Online => {
            inner.reachable = true;
            if !inner.running {
                return Transition::default();
            }
            info!(state = ?inner.state, "network online");
            Transition {
                reconnect: inner.state == ConnectionState::Closed,
                ..Transition::default()
            }
        }
        NetworkSignal::Offline => {
            inner.reachable = false;
            if !inner.running {
                return Transition::default();
            }
            info!("network offline");
            inner.state = ConnectionState::Closed;
            Transition {
                notify: Some(false),
                ..Transition::default()
            }
        }
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
