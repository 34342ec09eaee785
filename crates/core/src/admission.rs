use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Result of a rate-window check. `reset_at` is when the current window ends
/// and is always in the future relative to the checked instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub warning: Option<String>,
}

/// Per-requester fixed-window rate limiter.
///
/// A window starts on the first request after the prior window end; every
/// request increments the counter; a request is allowed iff the counter stays
/// at or under the maximum. State is in-process and resets on cold start,
/// which is acceptable for best-effort abuse mitigation.
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    warn_fraction: f64,
    windows: Mutex<HashMap<String, RequesterWindow>>,
}

struct RequesterWindow {
    count: u32,
    window_end: DateTime<Utc>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration, warn_fraction: f64) -> Self {
        Self { max_per_window, window, warn_fraction, windows: Mutex::new(HashMap::new()) }
    }

    pub fn check(&self, requester: &str) -> RateDecision {
        self.check_at(requester, Utc::now())
    }

    pub fn check_at(&self, requester: &str, now: DateTime<Utc>) -> RateDecision {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows
            .entry(requester.to_owned())
            .or_insert_with(|| RequesterWindow { count: 0, window_end: now + self.window });

        if now >= window.window_end {
            window.count = 0;
            window.window_end = now + self.window;
        }

        window.count += 1;
        let allowed = window.count <= self.max_per_window;
        let remaining = self.max_per_window.saturating_sub(window.count);

        let warn_threshold = (f64::from(self.max_per_window) * self.warn_fraction).ceil() as u32;
        let warning = (allowed && window.count >= warn_threshold).then(|| {
            format!("You have {remaining} requests left in the current window.")
        });

        RateDecision { allowed, remaining, reset_at: window.window_end, warning }
    }
}

/// Result of a pre-generation budget check.
#[derive(Clone, Debug, PartialEq)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub remaining_usd: f64,
}

/// Actual cost recorded after one generation.
#[derive(Clone, Debug, PartialEq)]
pub struct CostRecord {
    pub estimated_cost_usd: f64,
    pub remaining_usd: f64,
}

/// Rolling 24-hour cost ledger per requester.
///
/// `check` runs before generation against a worst-case token estimate;
/// `track` runs after generation with actual counts. Both hit the same
/// ledger. Once spend reaches the daily cap every further request is
/// rejected until the window rolls over; there is no override path.
pub struct BudgetLedger {
    daily_cap_usd: f64,
    price_per_million_usd: f64,
    ledgers: Mutex<HashMap<String, Ledger>>,
}

struct Ledger {
    tokens_used: u64,
    estimated_cost_usd: f64,
    request_count: u32,
    window_end: DateTime<Utc>,
}

impl BudgetLedger {
    pub fn new(daily_cap_usd: f64, price_per_million_usd: f64) -> Self {
        Self { daily_cap_usd, price_per_million_usd, ledgers: Mutex::new(HashMap::new()) }
    }

    fn cost_of(&self, tokens: u64) -> f64 {
        tokens as f64 / 1_000_000.0 * self.price_per_million_usd
    }

    pub fn check(&self, requester: &str, worst_case_tokens: u64) -> BudgetDecision {
        self.check_at(requester, worst_case_tokens, Utc::now())
    }

    pub fn check_at(
        &self,
        requester: &str,
        worst_case_tokens: u64,
        now: DateTime<Utc>,
    ) -> BudgetDecision {
        let mut ledgers = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        let ledger = entry_rolled(&mut ledgers, requester, now);

        let projected = ledger.estimated_cost_usd + self.cost_of(worst_case_tokens);
        let allowed = ledger.estimated_cost_usd < self.daily_cap_usd && projected <= self.daily_cap_usd;
        let remaining_usd = (self.daily_cap_usd - ledger.estimated_cost_usd).max(0.0);

        BudgetDecision { allowed, remaining_usd }
    }

    pub fn track(&self, requester: &str, input_tokens: u32, output_tokens: u32) -> CostRecord {
        self.track_at(requester, input_tokens, output_tokens, Utc::now())
    }

    pub fn track_at(
        &self,
        requester: &str,
        input_tokens: u32,
        output_tokens: u32,
        now: DateTime<Utc>,
    ) -> CostRecord {
        let tokens = u64::from(input_tokens) + u64::from(output_tokens);
        let cost = self.cost_of(tokens);

        let mut ledgers = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        let ledger = entry_rolled(&mut ledgers, requester, now);
        ledger.tokens_used += tokens;
        ledger.estimated_cost_usd += cost;
        ledger.request_count += 1;

        CostRecord {
            estimated_cost_usd: cost,
            remaining_usd: (self.daily_cap_usd - ledger.estimated_cost_usd).max(0.0),
        }
    }
}

fn entry_rolled<'a>(
    ledgers: &'a mut HashMap<String, Ledger>,
    requester: &str,
    now: DateTime<Utc>,
) -> &'a mut Ledger {
    let ledger = ledgers.entry(requester.to_owned()).or_insert_with(|| Ledger {
        tokens_used: 0,
        estimated_cost_usd: 0.0,
        request_count: 0,
        window_end: now + Duration::hours(24),
    });

    if now >= ledger.window_end {
        ledger.tokens_used = 0;
        ledger.estimated_cost_usd = 0.0;
        ledger.request_count = 0;
        ledger.window_end = now + Duration::hours(24);
    }

    ledger
}
