//! Connection admission filters
//!
//! Every accepted connection is checked against an ordered chain of filters
//! before any protocol-specific parsing: circuit breaker, IP ban, rate
//! limit. Authentication is the fourth step, performed inside the protocol
//! handshake; its outcome feeds back into the ban tracker and the breaker.

mod auth;
mod breaker;
mod ipban;
mod ratelimit;

pub use auth::AuthMiddleware;
pub use breaker::CircuitBreakerMiddleware;
pub use ipban::IpBanMiddleware;
pub use ratelimit::RateLimitMiddleware;

use crate::manager::BreakerState;
use std::sync::Arc;

/// Why admission rejected a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The circuit breaker is open
    BreakerOpen,
    /// The client IP is banned
    Banned,
    /// The client exhausted its rate limit
    RateLimited,
}

/// Ordered admission filter chain shared by both protocol frontends
#[derive(Clone)]
pub struct Admission {
    breaker: CircuitBreakerMiddleware,
    ip_ban: IpBanMiddleware,
    rate_limit: Arc<RateLimitMiddleware>,
}

impl Admission {
    /// Bundle the three admission filters
    pub fn new(
        breaker: CircuitBreakerMiddleware,
        ip_ban: IpBanMiddleware,
        rate_limit: Arc<RateLimitMiddleware>,
    ) -> Self {
        Admission {
            breaker,
            ip_ban,
            rate_limit,
        }
    }

    /// Run the filter chain for a client IP, returning the first rejection
    pub fn check(&self, ip: &str) -> Result<(), Rejection> {
        if self.breaker.is_open() {
            return Err(Rejection::BreakerOpen);
        }
        if self.ip_ban.is_blocked(ip) {
            return Err(Rejection::Banned);
        }
        if !self.rate_limit.allow(ip) {
            return Err(Rejection::RateLimited);
        }
        Ok(())
    }

    /// Feed an authentication failure into the ban tracker and the breaker
    pub fn record_auth_failure(&self, ip: &str) {
        self.ip_ban.record_auth_failure(ip);
        self.breaker.record_auth_failure();
    }

    /// Feed an authentication success into the ban tracker and the breaker
    pub fn record_auth_success(&self, ip: &str) {
        self.ip_ban.record_auth_success(ip);
        self.breaker.record_auth_success();
    }

    /// Current breaker state, for rejection logging
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{CircuitBreaker, IpBanManager};
    use std::time::Duration;

    async fn admission(dir: &tempfile::TempDir) -> Admission {
        let ban_mgr = Arc::new(
            IpBanManager::new(
                2,
                Duration::from_secs(60),
                vec![],
                dir.path().join("ipban.json"),
            )
            .await,
        );
        let breaker = Arc::new(CircuitBreaker::new(
            50,
            Duration::from_secs(60),
            2,
            Duration::from_secs(30),
        ));
        Admission::new(
            CircuitBreakerMiddleware::new(true, breaker),
            IpBanMiddleware::new(true, ban_mgr),
            Arc::new(RateLimitMiddleware::new(false, 0, 0)),
        )
    }

    #[tokio::test]
    async fn test_admission_passes_clean_ip() {
        let dir = tempfile::tempdir().unwrap();
        let adm = admission(&dir).await;
        assert_eq!(adm.check("10.0.0.1"), Ok(()));
    }

    #[tokio::test]
    async fn test_admission_rejects_banned_ip() {
        let dir = tempfile::tempdir().unwrap();
        let adm = admission(&dir).await;

        adm.record_auth_failure("10.0.0.1");
        assert_eq!(adm.check("10.0.0.1"), Ok(()));
        adm.record_auth_failure("10.0.0.1");
        assert_eq!(adm.check("10.0.0.1"), Err(Rejection::Banned));

        // Other IPs are unaffected
        assert_eq!(adm.check("10.0.0.2"), Ok(()));
    }

    #[tokio::test]
    async fn test_breaker_rejection_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let adm = admission(&dir).await;

        // Two failures trip both the ban (max 2) and the breaker (min 2, 50%)
        adm.record_auth_failure("10.0.0.1");
        adm.record_auth_failure("10.0.0.1");
        assert_eq!(adm.check("10.0.0.1"), Err(Rejection::BreakerOpen));
        assert_eq!(adm.breaker_state().to_string(), "open");
    }

    #[tokio::test]
    async fn test_rate_limit_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let ban_mgr = Arc::new(
            IpBanManager::new(
                5,
                Duration::from_secs(60),
                vec![],
                dir.path().join("ipban.json"),
            )
            .await,
        );
        let breaker = Arc::new(CircuitBreaker::new(
            50,
            Duration::from_secs(60),
            100,
            Duration::from_secs(30),
        ));
        let adm = Admission::new(
            CircuitBreakerMiddleware::new(true, breaker),
            IpBanMiddleware::new(true, ban_mgr),
            Arc::new(RateLimitMiddleware::new(true, 1000, 1)),
        );

        // Burst of 2 (twice the rate), then rejection
        assert_eq!(adm.check("10.0.0.1"), Ok(()));
        assert_eq!(adm.check("10.0.0.1"), Ok(()));
        assert_eq!(adm.check("10.0.0.1"), Err(Rejection::RateLimited));
    }
}
