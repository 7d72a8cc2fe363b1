//! Advertiser role: announce local availability under a service namespace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::transport::{AdvertiseDriver, TransportError};

/// Makes the local peer discoverable for the lifetime of its activation.
/// Start and stop are idempotent; errors beyond the initial `start` surface
/// through the transport event stream.
pub struct Advertiser {
    namespace: String,
    driver: Arc<dyn AdvertiseDriver>,
    active: AtomicBool,
}

impl Advertiser {
    pub fn new(namespace: impl Into<String>, driver: Arc<dyn AdvertiseDriver>) -> Self {
        Self {
            namespace: namespace.into(),
            driver,
            active: AtomicBool::new(false),
        }
    }

    /// Begin answering discovery probes. Calling again while active is a
    /// no-op.
    pub fn start(&self) -> Result<(), TransportError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match self.driver.start(&self.namespace) {
            Ok(()) => {
                debug!(namespace = %self.namespace, "advertising started");
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Cease advertising. Calling again while inactive is a no-op.
    pub fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            self.driver.stop();
            debug!(namespace = %self.namespace, "advertising stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.stop();
    }
}
