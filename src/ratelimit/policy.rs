//! Predefined admission policies
//!
//! Every policy is scoped by client identity; the key prefix keeps buckets of
//! different policies apart for the same client. The constants below are the
//! defaults; limits and windows can be overridden through
//! [`PolicyConfig`](crate::config::PolicyConfig).

use serde::Deserialize;

/// A named rate-limit policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Bucket key prefix
    pub key_prefix: &'static str,

    /// Maximum admitted requests per window
    pub limit: u32,

    /// Window length in seconds
    pub window_secs: u64,
}

/// Direct analysis submissions
pub const STANDALONE: RateLimitPolicy = RateLimitPolicy {
    key_prefix: "standalone",
    limit: 40,
    window_secs: 60,
};

/// Privileged control calls relayed through the proxy
pub const PROXY: RateLimitPolicy = RateLimitPolicy {
    key_prefix: "proxy",
    limit: 15,
    window_secs: 60,
};

/// Regulator feed reads
pub const REGULATOR_FEED: RateLimitPolicy = RateLimitPolicy {
    key_prefix: "regulator_feed",
    limit: 10,
    window_secs: 60,
};

/// Live connection upgrades
pub const CONNECTION_HANDSHAKE: RateLimitPolicy = RateLimitPolicy {
    key_prefix: "connection_handshake",
    limit: 20,
    window_secs: 120,
};

/// Telemetry publishes from the analysis pipeline.
///
/// The caller is one service publishing for every tenant, so the budget is
/// sized for aggregate traffic rather than a single user.
pub const INGEST: RateLimitPolicy = RateLimitPolicy {
    key_prefix: "ingest",
    limit: 1200,
    window_secs: 60,
};

/// Which predefined policy an entry point uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Standalone,
    Proxy,
    RegulatorFeed,
    ConnectionHandshake,
    Ingest,
}

impl PolicyKind {
    /// Built-in policy for this kind
    pub fn default_policy(&self) -> RateLimitPolicy {
        match self {
            PolicyKind::Standalone => STANDALONE,
            PolicyKind::Proxy => PROXY,
            PolicyKind::RegulatorFeed => REGULATOR_FEED,
            PolicyKind::ConnectionHandshake => CONNECTION_HANDSHAKE,
            PolicyKind::Ingest => INGEST,
        }
    }
}

/// Limit and window of one policy, as read from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PolicyLimits {
    pub limit: u32,
    pub window_secs: u64,
}

impl From<RateLimitPolicy> for PolicyLimits {
    fn from(policy: RateLimitPolicy) -> Self {
        Self {
            limit: policy.limit,
            window_secs: policy.window_secs,
        }
    }
}

impl PolicyLimits {
    /// Apply these limits to `kind`, keeping its key prefix
    pub fn to_policy(self, kind: PolicyKind) -> RateLimitPolicy {
        RateLimitPolicy {
            key_prefix: kind.default_policy().key_prefix,
            limit: self.limit,
            window_secs: self.window_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_policies() {
        assert_eq!((STANDALONE.limit, STANDALONE.window_secs), (40, 60));
        assert_eq!((PROXY.limit, PROXY.window_secs), (15, 60));
        assert_eq!((REGULATOR_FEED.limit, REGULATOR_FEED.window_secs), (10, 60));
        assert_eq!(
            (CONNECTION_HANDSHAKE.limit, CONNECTION_HANDSHAKE.window_secs),
            (20, 120)
        );
    }

    #[test]
    fn test_overridden_limits_keep_prefix() {
        let policy = PolicyLimits {
            limit: 5,
            window_secs: 10,
        }
        .to_policy(PolicyKind::Proxy);
        assert_eq!(policy.key_prefix, "proxy");
        assert_eq!((policy.limit, policy.window_secs), (5, 10));
    }
}
