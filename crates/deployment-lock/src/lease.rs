//! The lease document

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An ephemeral, cluster-visible mutual-exclusion token.
///
/// At most one non-expired lease exists per deployment; the backend's
/// conditional operations enforce it. Expiry bounds how long a crashed
/// holder can block other invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    /// Deployment this lease guards
    pub deployment: String,
    /// Opaque identifier of the holding process
    pub holder: String,
    /// When the lease was created
    pub acquired_at: DateTime<Utc>,
    /// When the lease stops being valid
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Create a lease valid for `ttl` from now.
    pub fn new(deployment: impl Into<String>, holder: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            deployment: deployment.into(),
            holder: holder.into(),
            acquired_at: now,
            expires_at: now + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero()),
        }
    }

    /// Whether the lease has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// A copy of this lease with its expiry pushed out to `ttl` from now.
    pub fn renewed(&self, ttl: Duration) -> Self {
        Self {
            expires_at: Utc::now()
                + ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let live = Lease::new("dev", "holder-a", Duration::from_secs(60));
        assert!(!live.is_expired());

        let dead = Lease::new("dev", "holder-a", Duration::from_secs(0));
        assert!(dead.is_expired());
    }

    #[test]
    fn test_renewal_keeps_identity() {
        let lease = Lease::new("dev", "holder-a", Duration::from_millis(10));
        let renewed = lease.renewed(Duration::from_secs(60));
        assert_eq!(renewed.holder, lease.holder);
        assert_eq!(renewed.acquired_at, lease.acquired_at);
        assert!(renewed.expires_at > lease.expires_at);
    }
}
