use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn is_authenticated(&self) -> bool;
}

/// Authentication state pushed by the host; seeded from whether an API token
/// is configured.
#[derive(Debug, Default)]
pub struct HostAuth {
    authenticated: AtomicBool,
}

impl HostAuth {
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated: AtomicBool::new(authenticated),
        }
    }

    pub fn set(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for HostAuth {
    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}
