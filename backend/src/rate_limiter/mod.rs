// SPDX-FileCopyrightText: 2025 The Relay Broker Authors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-client submission rate limiter.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use relaycommon::identifiers::ClientId;

use crate::settings::RateLimitSettings;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_requests: u64,
    pub time_window: TimeDelta,
}

impl From<&RateLimitSettings> for RateLimiterConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            max_requests: settings.max_requests,
            time_window: TimeDelta::seconds(settings.window_secs as i64),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Allowance {
    remaining: u64,
    valid_until: DateTime<Utc>,
}

impl Allowance {
    fn new(config: &RateLimiterConfig) -> Self {
        Allowance {
            remaining: config.max_requests,
            valid_until: Utc::now() + config.time_window,
        }
    }

    fn reset(&mut self, config: &RateLimiterConfig) {
        self.remaining = config.max_requests;
        self.valid_until = Utc::now() + config.time_window;
    }

    fn allowed(&mut self, config: &RateLimiterConfig) -> bool {
        // Check if the time window has passed
        if self.valid_until < Utc::now() {
            self.reset(config);
        }

        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}

/// Windowed request counter keyed by client id. State is in-process; each
/// gateway instance enforces its own budget.
pub struct RateLimiter {
    config: RateLimiterConfig,
    allowances: Mutex<HashMap<ClientId, Allowance>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        RateLimiter {
            config,
            allowances: Mutex::new(HashMap::new()),
        }
    }

    /// Account one request for the client; `false` means the budget for the
    /// current window is exhausted.
    pub async fn allowed(&self, client_id: &ClientId) -> bool {
        let mut allowances = self.allowances.lock().await;
        let allowance = allowances
            .entry(client_id.clone())
            .or_insert_with(|| Allowance::new(&self.config));
        allowance.allowed(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_is_enforced_per_window() {
        let config = RateLimiterConfig {
            max_requests: 5,
            time_window: TimeDelta::milliseconds(20),
        };
        let rate_limiter = RateLimiter::new(config.clone());
        let client: ClientId = "client_alpha".parse().unwrap();

        // First 5 requests should succeed
        for _ in 0..config.max_requests {
            assert!(rate_limiter.allowed(&client).await);
        }

        // 6th request should fail
        assert!(!rate_limiter.allowed(&client).await);

        // Wait for the time window to reset
        tokio::time::sleep(config.time_window.to_std().unwrap()).await;

        // Now it should succeed again
        assert!(rate_limiter.allowed(&client).await);
    }

    #[tokio::test]
    async fn budgets_are_tracked_per_client() {
        let rate_limiter = RateLimiter::new(RateLimiterConfig {
            max_requests: 1,
            time_window: TimeDelta::seconds(60),
        });
        let alpha: ClientId = "client_alpha".parse().unwrap();
        let beta: ClientId = "client_beta".parse().unwrap();

        assert!(rate_limiter.allowed(&alpha).await);
        assert!(!rate_limiter.allowed(&alpha).await);
        assert!(rate_limiter.allowed(&beta).await);
    }

    #[tokio::test]
    async fn default_settings_allow_100_per_minute() {
        let settings = RateLimitSettings::default();
        let rate_limiter = RateLimiter::new(RateLimiterConfig::from(&settings));
        let client: ClientId = "client_alpha".parse().unwrap();
        for _ in 0..100 {
            assert!(rate_limiter.allowed(&client).await);
        }
        assert!(!rate_limiter.allowed(&client).await);
    }
}
