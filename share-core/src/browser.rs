//! Browser role: discover advertised peers and negotiate joining one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::identity::PeerIdentity;
use crate::transport::{BrowseDriver, JoinCallback, JoinOutcome, TransportError};

/// Browser lifecycle. `Joining` covers the window between `request_join` and
/// its single-shot completion callback; every terminal join outcome returns
/// the browser to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseState {
    Idle,
    Discovering,
    Joining,
}

#[derive(Debug, thiserror::Error)]
pub enum BrowseError {
    /// `request_join` is only valid while discovering.
    #[error("no discovery in progress")]
    NotDiscovering,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Discovers peers advertising under a namespace. Discovered-peer
/// notifications flow through the transport event stream as an unbounded,
/// restartable sequence until `stop_discovery` / `cancel`.
pub struct Browser {
    namespace: String,
    driver: Arc<dyn BrowseDriver>,
    state: Arc<Mutex<BrowseState>>,
    // Bumped on every cancel; a join callback from a previous epoch reports
    // Cancelled and leaves shared state alone.
    epoch: Arc<AtomicU64>,
}

impl Browser {
    pub fn new(namespace: impl Into<String>, driver: Arc<dyn BrowseDriver>) -> Self {
        Self {
            namespace: namespace.into(),
            driver,
            state: Arc::new(Mutex::new(BrowseState::Idle)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Begin (or resume) probing for advertised peers. A no-op while already
    /// discovering or joining.
    pub fn start_discovery(&self) -> Result<(), BrowseError> {
        {
            let state = self.state.lock().unwrap();
            if *state != BrowseState::Idle {
                return Ok(());
            }
        }
        self.driver.start(&self.namespace)?;
        *self.state.lock().unwrap() = BrowseState::Discovering;
        debug!(namespace = %self.namespace, "discovery started");
        Ok(())
    }

    /// End discovery and abandon any in-flight join. Safe in every state.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let was = {
            let mut state = self.state.lock().unwrap();
            std::mem::replace(&mut *state, BrowseState::Idle)
        };
        if was != BrowseState::Idle {
            self.driver.stop();
            debug!(namespace = %self.namespace, "discovery stopped");
        }
    }

    /// Alias for [`Browser::cancel`], matching the consumer-facing verb.
    pub fn stop_discovery(&self) {
        self.cancel();
    }

    /// Attempt to join a discovered peer's session. Completion is reported
    /// exactly once through `done`; discovery ends once the attempt reaches a
    /// terminal outcome.
    pub fn request_join(&self, peer: &PeerIdentity, done: JoinCallback) -> Result<(), BrowseError> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != BrowseState::Discovering {
                return Err(BrowseError::NotDiscovering);
            }
            *state = BrowseState::Joining;
        }

        let state = self.state.clone();
        let epoch = self.epoch.clone();
        let started_epoch = epoch.load(Ordering::SeqCst);
        let driver = self.driver.clone();
        let wrapped: JoinCallback = Box::new(move |outcome| {
            let stale = epoch.load(Ordering::SeqCst) != started_epoch;
            if !stale {
                *state.lock().unwrap() = BrowseState::Idle;
                driver.stop();
            }
            done(if stale { JoinOutcome::Cancelled } else { outcome });
        });

        debug!(peer = %peer, "join requested");
        if let Err(e) = self.driver.join(peer, wrapped) {
            // The attempt never started: discovery keeps running and the
            // consumer may retry. Only a cancel in between leaves Idle.
            let mut state = self.state.lock().unwrap();
            if *state == BrowseState::Joining {
                *state = BrowseState::Discovering;
            }
            return Err(BrowseError::Transport(e));
        }
        Ok(())
    }

    pub fn state(&self) -> BrowseState {
        *self.state.lock().unwrap()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PeerIdentity;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Driver that parks join callbacks so tests control completion timing.
    #[derive(Default)]
    struct ParkedDriver {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_join: AtomicBool,
        pending: Mutex<Option<JoinCallback>>,
    }

    impl ParkedDriver {
        fn complete(&self, outcome: JoinOutcome) {
            let cb = self.pending.lock().unwrap().take().expect("pending join");
            cb(outcome);
        }
    }

    impl BrowseDriver for ParkedDriver {
        fn start(&self, _namespace: &str) -> Result<(), TransportError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn join(&self, peer: &PeerIdentity, done: JoinCallback) -> Result<(), TransportError> {
            if self.fail_join.load(Ordering::SeqCst) {
                return Err(TransportError::Unreachable(peer.to_string()));
            }
            *self.pending.lock().unwrap() = Some(done);
            Ok(())
        }
    }

    fn outcome_slot() -> (Arc<Mutex<Option<JoinOutcome>>>, JoinCallback) {
        let slot = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let cb: JoinCallback = Box::new(move |o| {
            *s.lock().unwrap() = Some(o);
        });
        (slot, cb)
    }

    #[test]
    fn discovery_is_restartable() {
        let driver = Arc::new(ParkedDriver::default());
        let browser = Browser::new("ns", driver.clone());

        browser.start_discovery().unwrap();
        browser.start_discovery().unwrap();
        assert_eq!(driver.starts.load(Ordering::SeqCst), 1);
        assert_eq!(browser.state(), BrowseState::Discovering);

        browser.stop_discovery();
        assert_eq!(browser.state(), BrowseState::Idle);

        browser.start_discovery().unwrap();
        assert_eq!(driver.starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn join_requires_discovering() {
        let driver = Arc::new(ParkedDriver::default());
        let browser = Browser::new("ns", driver);
        let (_, cb) = outcome_slot();
        assert!(matches!(
            browser.request_join(&PeerIdentity::new("host"), cb),
            Err(BrowseError::NotDiscovering)
        ));
    }

    #[test]
    fn successful_join_returns_to_idle() {
        let driver = Arc::new(ParkedDriver::default());
        let browser = Browser::new("ns", driver.clone());
        browser.start_discovery().unwrap();

        let (slot, cb) = outcome_slot();
        browser.request_join(&PeerIdentity::new("host"), cb).unwrap();
        assert_eq!(browser.state(), BrowseState::Joining);

        driver.complete(JoinOutcome::Joined);
        assert!(matches!(*slot.lock().unwrap(), Some(JoinOutcome::Joined)));
        assert_eq!(browser.state(), BrowseState::Idle);
    }

    #[test]
    fn cancel_during_join_reports_cancelled() {
        let driver = Arc::new(ParkedDriver::default());
        let browser = Browser::new("ns", driver.clone());
        browser.start_discovery().unwrap();

        let (slot, cb) = outcome_slot();
        browser.request_join(&PeerIdentity::new("host"), cb).unwrap();
        browser.cancel();
        assert_eq!(browser.state(), BrowseState::Idle);

        // The in-flight callback lands after cancel: it must not resurrect
        // any state and must read as cancelled.
        driver.complete(JoinOutcome::Joined);
        assert!(matches!(*slot.lock().unwrap(), Some(JoinOutcome::Cancelled)));
        assert_eq!(browser.state(), BrowseState::Idle);
    }

    #[test]
    fn failed_join_attempt_leaves_discovery_running() {
        let driver = Arc::new(ParkedDriver::default());
        let browser = Browser::new("ns", driver.clone());
        browser.start_discovery().unwrap();

        driver.fail_join.store(true, Ordering::SeqCst);
        let (_, cb) = outcome_slot();
        assert!(matches!(
            browser.request_join(&PeerIdentity::new("host"), cb),
            Err(BrowseError::Transport(_))
        ));
        assert_eq!(browser.state(), BrowseState::Discovering);
        assert_eq!(driver.stops.load(Ordering::SeqCst), 0);

        // Retry without restarting discovery.
        driver.fail_join.store(false, Ordering::SeqCst);
        let (slot, cb) = outcome_slot();
        browser.request_join(&PeerIdentity::new("host"), cb).unwrap();
        driver.complete(JoinOutcome::Joined);
        assert!(matches!(*slot.lock().unwrap(), Some(JoinOutcome::Joined)));
        assert_eq!(driver.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_in_idle_is_harmless() {
        let driver = Arc::new(ParkedDriver::default());
        let browser = Browser::new("ns", driver.clone());
        browser.cancel();
        browser.cancel();
        assert_eq!(driver.stops.load(Ordering::SeqCst), 0);
    }
}
