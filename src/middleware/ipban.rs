//! Admission gate over the ban tracker

use crate::manager::IpBanManager;
use std::sync::Arc;

/// Gates admission on ban state and routes auth outcomes to the tracker
///
/// When disabled, every check passes and outcomes are discarded.
#[derive(Clone)]
pub struct IpBanMiddleware {
    enabled: bool,
    manager: Arc<IpBanManager>,
}

impl IpBanMiddleware {
    /// Wrap a ban tracker
    pub fn new(enabled: bool, manager: Arc<IpBanManager>) -> Self {
        IpBanMiddleware { enabled, manager }
    }

    /// Whether the IP is currently banned
    pub fn is_blocked(&self, ip: &str) -> bool {
        if !self.enabled {
            return false;
        }
        self.manager.is_banned(ip)
    }

    /// Record an authentication failure
    pub fn record_auth_failure(&self, ip: &str) {
        if !self.enabled {
            return;
        }
        self.manager.record_failure(ip);
    }

    /// Record a successful authentication
    pub fn record_auth_success(&self, ip: &str) {
        if !self.enabled {
            return;
        }
        self.manager.record_success(ip);
    }

    /// Whether IP banning participates in admission
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn manager(dir: &tempfile::TempDir) -> Arc<IpBanManager> {
        Arc::new(
            IpBanManager::new(
                1,
                Duration::from_secs(60),
                vec![],
                dir.path().join("ipban.json"),
            )
            .await,
        )
    }

    #[tokio::test]
    async fn test_enabled_gate_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mw = IpBanMiddleware::new(true, manager(&dir).await);

        assert!(!mw.is_blocked("10.0.0.1"));
        mw.record_auth_failure("10.0.0.1");
        assert!(mw.is_blocked("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_disabled_gate_is_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(&dir).await;
        let mw = IpBanMiddleware::new(false, Arc::clone(&mgr));

        mw.record_auth_failure("10.0.0.1");
        assert!(!mw.is_blocked("10.0.0.1"));
        // Disabled middleware never reached the tracker
        assert_eq!(mgr.failure_count("10.0.0.1"), 0);
    }
}
