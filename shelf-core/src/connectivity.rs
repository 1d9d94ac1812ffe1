//! Online/offline tracking.
//!
//! The monitor holds the last observed reachability in a `watch` channel and
//! fans transitions out to explicitly registered listeners. Nothing here is
//! ambient: listeners live exactly as long as their [`Subscription`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    fn from_online(online: bool) -> Self {
        if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        }
    }
}

/// Source of truth for "can we reach the network right now".
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Reachable when a TCP connection to `addr` opens within `timeout`.
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr)).await,
            Ok(Ok(_))
        )
    }
}

type Listener = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;

struct Inner {
    state: watch::Sender<bool>,
    listeners: DashMap<u64, Listener>,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            inner: Arc::new(Inner {
                state,
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Seed the initial value from the runtime instead of assuming online.
    pub async fn detect(probe: &dyn ReachabilityProbe) -> Self {
        Self::new(probe.is_reachable().await)
    }

    /// Current value; re-read it rather than caching across long sessions.
    pub fn is_online(&self) -> bool {
        *self.inner.state.borrow()
    }

    /// Record an observation. Listeners hear about transitions only, not repeats.
    pub fn set_online(&self, online: bool) {
        let changed = self.inner.state.send_if_modified(|cur| {
            if *cur == online {
                false
            } else {
                *cur = online;
                true
            }
        });
        if !changed {
            return;
        }
        let event = ConnectivityEvent::from_online(online);
        tracing::info!(?event, "connectivity changed");
        // Snapshot first so a listener may unsubscribe itself without deadlocking the map.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .iter()
            .map(|l| l.value().clone())
            .collect();
        for l in listeners {
            l(event);
        }
    }

    /// Stream of the online flag for async consumers.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.state.subscribe()
    }

    #[must_use = "dropping the Subscription unsubscribes the listener"]
    pub fn on_connectivity_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectivityEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.insert(id, Arc::new(listener));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Re-probe every `every` and publish transitions until the handle is aborted.
    pub fn spawn_poller(&self, probe: Arc<dyn ReachabilityProbe>, every: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let online = probe.is_reachable().await;
                monitor.set_online(online);
            }
        })
    }
}

/// Listener registration handle; unsubscribes on drop.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.listeners.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    fn recorder() -> (Arc<Mutex<Vec<ConnectivityEvent>>>, impl Fn(ConnectivityEvent) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |e| sink.lock().unwrap().push(e))
    }

    #[test]
    fn only_transitions_are_delivered() {
        let mon = ConnectivityMonitor::new(true);
        let (seen, f) = recorder();
        let _sub = mon.on_connectivity_change(f);

        mon.set_online(true);
        mon.set_online(false);
        mon.set_online(false);
        mon.set_online(true);

        assert!(mon.is_online());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectivityEvent::Offline, ConnectivityEvent::Online]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mon = ConnectivityMonitor::new(true);
        let (seen, f) = recorder();
        let sub = mon.on_connectivity_change(f);
        assert_eq!(mon.listener_count(), 1);
        sub.unsubscribe();
        assert_eq!(mon.listener_count(), 0);
        mon.set_online(false);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn watch_receiver_sees_latest_value() {
        let mon = ConnectivityMonitor::new(false);
        let mut rx = mon.subscribe();
        mon.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    struct Toggle(AtomicBool);

    #[async_trait]
    impl ReachabilityProbe for Toggle {
        async fn is_reachable(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_publishes_probe_results() {
        let probe = Arc::new(Toggle(AtomicBool::new(false)));
        let mon = ConnectivityMonitor::detect(probe.as_ref()).await;
        assert!(!mon.is_online());

        let mut rx = mon.subscribe();
        let handle = mon.spawn_poller(probe.clone(), Duration::from_secs(5));
        probe.0.store(true, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert!(mon.is_online());
        handle.abort();
    }

    #[tokio::test]
    async fn tcp_probe_against_closed_port_is_offline() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(TcpProbe::new(&addr, Duration::from_secs(1)).is_reachable().await);
        drop(listener);
        assert!(!TcpProbe::new(&addr, Duration::from_millis(200)).is_reachable().await);
    }
}
