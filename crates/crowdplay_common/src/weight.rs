//! Vote weight sources.
//!
//! The engine asks one [`WeightResolver`] per valid vote and applies
//! `max(base, resolved)`, floored at 1. Sources never stack: combine
//! several with [`MaxOf`], which also takes the maximum.
//!
//! Resolvers are called on the vote path and must answer from memory.
//! Anything that needs I/O should refresh its table in the background
//! and serve the last known value here.

use crate::config::{PurchaseTier, WeightConfig};
use crate::error::WeightError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Weight floor for any counted vote
pub const MIN_WEIGHT: f64 = 1.0;

pub trait WeightResolver: Send + Sync {
    /// Current multiplier for `user`, >= 1 on success
    fn resolve_weight(&self, user: &str) -> Result<f64, WeightError>;
}

/// Apply `max(base, resolver(user))`, falling back to `base` on failure
pub fn effective_weight(base: f64, resolver: &dyn WeightResolver, user: &str) -> f64 {
    let base = if base.is_finite() { base.max(MIN_WEIGHT) } else { MIN_WEIGHT };

    match resolver.resolve_weight(user) {
        Ok(w) if w.is_finite() => base.max(w),
        Ok(w) => {
            warn!("Weight source returned {} for {}, using base weight", w, user);
            base
        }
        Err(e) => {
            debug!("No weight boost for {}: {}", user, e);
            base
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicked writer leaves a plain map behind; keep serving it
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// FIXED
// ============================================================================

/// Same weight for everyone
#[derive(Debug, Clone, Copy)]
pub struct FixedWeight(pub f64);

impl Default for FixedWeight {
    fn default() -> Self {
        FixedWeight(MIN_WEIGHT)
    }
}

impl WeightResolver for FixedWeight {
    fn resolve_weight(&self, _user: &str) -> Result<f64, WeightError> {
        if self.0.is_finite() {
            Ok(self.0)
        } else {
            Err(WeightError::NotFinite(self.0))
        }
    }
}

// ============================================================================
// TEMPORARY BOOSTS
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Boost {
    weight: f64,
    expires: Instant,
}

/// Per-user weight boosts that expire, e.g. granted on a trade event
#[derive(Debug, Default)]
pub struct BoostTable {
    boosts: Mutex<HashMap<String, Boost>>,
}

impl BoostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give `user` a `weight` boost for `duration`, replacing any previous one.
    ///
    /// Returns false, granting nothing, when the expiry is not representable.
    pub fn grant(&self, user: &str, weight: f64, duration: Duration) -> bool {
        self.grant_at(user, weight, duration, Instant::now())
    }

    pub fn grant_at(&self, user: &str, weight: f64, duration: Duration, now: Instant) -> bool {
        let Some(expires) = now.checked_add(duration) else {
            warn!("Boost of {}s for {} is out of range, ignored", duration.as_secs(), user);
            return false;
        };

        info!(
            "Set user {} weight to {} for {}s",
            user,
            weight,
            duration.as_secs()
        );
        let mut boosts = lock(&self.boosts);
        boosts.retain(|_, b| b.expires > now);
        boosts.insert(user.to_string(), Boost { weight, expires });
        true
    }

    /// Active boost for `user` at `now`; expired entries are removed
    pub fn weight_at(&self, user: &str, now: Instant) -> Option<f64> {
        let mut boosts = lock(&self.boosts);
        match boosts.get(user) {
            Some(b) if b.expires > now => Some(b.weight),
            Some(_) => {
                boosts.remove(user);
                None
            }
            None => None,
        }
    }

    /// Drop every expired boost; returns how many were removed
    pub fn prune(&self, now: Instant) -> usize {
        let mut boosts = lock(&self.boosts);
        let before = boosts.len();
        boosts.retain(|_, b| b.expires > now);
        before - boosts.len()
    }

    pub fn active(&self) -> usize {
        lock(&self.boosts).len()
    }
}

impl WeightResolver for BoostTable {
    fn resolve_weight(&self, user: &str) -> Result<f64, WeightError> {
        Ok(self.weight_at(user, Instant::now()).unwrap_or(MIN_WEIGHT))
    }
}

// ============================================================================
// PURCHASE TIERS
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Purchase {
    amount: f64,
    at: Instant,
}

/// Weight from a user's most recent purchase, scaled by amount tiers
#[derive(Debug)]
pub struct PurchaseTiers {
    tiers: Vec<PurchaseTier>,
    window: Duration,
    purchases: Mutex<HashMap<String, Purchase>>,
}

impl PurchaseTiers {
    pub fn new(mut tiers: Vec<PurchaseTier>, window: Duration) -> Self {
        tiers.sort_by(|a, b| a.min_amount.total_cmp(&b.min_amount));
        Self {
            tiers,
            window,
            purchases: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &WeightConfig) -> Self {
        Self::new(
            config.purchase_tiers.clone(),
            Duration::from_secs(config.purchase_window_secs),
        )
    }

    pub fn record_purchase(&self, user: &str, amount: f64) {
        self.record_purchase_at(user, amount, Instant::now());
    }

    pub fn record_purchase_at(&self, user: &str, amount: f64, now: Instant) {
        debug!("Purchase of {} recorded for {}", amount, user);
        let mut purchases = lock(&self.purchases);
        purchases.retain(|_, p| now.saturating_duration_since(p.at) < self.window);
        purchases.insert(user.to_string(), Purchase { amount, at: now });
    }

    /// Drop purchases older than the window; returns how many were removed
    pub fn prune(&self, now: Instant) -> usize {
        let mut purchases = lock(&self.purchases);
        let before = purchases.len();
        purchases.retain(|_, p| now.saturating_duration_since(p.at) < self.window);
        before - purchases.len()
    }

    /// Purchases still held in the table
    pub fn tracked(&self) -> usize {
        lock(&self.purchases).len()
    }

    /// Weight of the tier matching `amount`, None below every tier
    pub fn tier_weight(&self, amount: f64) -> Option<f64> {
        self.tiers
            .iter()
            .rev()
            .find(|t| amount >= t.min_amount)
            .map(|t| t.weight)
    }

    /// Tier weight of `user`'s latest purchase; a stale purchase is removed
    pub fn weight_at(&self, user: &str, now: Instant) -> f64 {
        let mut purchases = lock(&self.purchases);
        match purchases.get(user) {
            Some(p) if now.saturating_duration_since(p.at) < self.window => {
                self.tier_weight(p.amount).unwrap_or(MIN_WEIGHT)
            }
            Some(_) => {
                purchases.remove(user);
                MIN_WEIGHT
            }
            None => MIN_WEIGHT,
        }
    }
}

impl WeightResolver for PurchaseTiers {
    fn resolve_weight(&self, user: &str) -> Result<f64, WeightError> {
        Ok(self.weight_at(user, Instant::now()))
    }
}

// ============================================================================
// COMBINATOR
// ============================================================================

/// Maximum over several sources; failing sources are skipped
#[derive(Clone, Default)]
pub struct MaxOf {
    sources: Vec<Arc<dyn WeightResolver>>,
}

impl MaxOf {
    pub fn new(sources: Vec<Arc<dyn WeightResolver>>) -> Self {
        Self { sources }
    }

    pub fn push(&mut self, source: Arc<dyn WeightResolver>) {
        self.sources.push(source);
    }
}

impl WeightResolver for MaxOf {
    fn resolve_weight(&self, user: &str) -> Result<f64, WeightError> {
        let mut best: Option<f64> = None;
        let mut last_err = None;

        for source in &self.sources {
            match source.resolve_weight(user) {
                Ok(w) if w.is_finite() => best = Some(best.map_or(w, |b| b.max(w))),
                Ok(w) => last_err = Some(WeightError::NotFinite(w)),
                Err(e) => last_err = Some(e),
            }
        }

        match (best, last_err) {
            (Some(w), _) => Ok(w),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(MIN_WEIGHT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl WeightResolver for Failing {
        fn resolve_weight(&self, _user: &str) -> Result<f64, WeightError> {
            Err(WeightError::Unavailable("offline".to_string()))
        }
    }

    #[test]
    fn test_weight_is_max_not_sum() {
        assert_eq!(effective_weight(1.0, &FixedWeight(3.0), "u"), 3.0);
        assert_eq!(effective_weight(4.0, &FixedWeight(3.0), "u"), 4.0);
    }

    #[test]
    fn test_failure_falls_back_to_base() {
        assert_eq!(effective_weight(2.0, &Failing, "u"), 2.0);
        assert_eq!(effective_weight(1.0, &FixedWeight(f64::NAN), "u"), 1.0);
    }

    #[test]
    fn test_weight_never_below_one() {
        assert_eq!(effective_weight(0.2, &FixedWeight(0.5), "u"), 1.0);
        assert_eq!(effective_weight(f64::NAN, &Failing, "u"), 1.0);
    }

    #[test]
    fn test_boost_expires() {
        let table = BoostTable::new();
        let t0 = Instant::now();
        table.grant_at("alice", 2.0, Duration::from_secs(60), t0);

        assert_eq!(table.weight_at("alice", t0 + Duration::from_secs(59)), Some(2.0));
        assert_eq!(table.weight_at("alice", t0 + Duration::from_secs(60)), None);
        assert_eq!(table.active(), 0);
        assert_eq!(table.weight_at("bob", t0), None);
    }

    #[test]
    fn test_boost_prune() {
        let table = BoostTable::new();
        let t0 = Instant::now();
        table.grant_at("a", 2.0, Duration::from_secs(10), t0);
        table.grant_at("b", 2.0, Duration::from_secs(100), t0);
        assert_eq!(table.prune(t0 + Duration::from_secs(50)), 1);
        assert_eq!(table.active(), 1);
    }

    #[test]
    fn test_boost_out_of_range_is_refused() {
        let table = BoostTable::new();
        let t0 = Instant::now();
        assert!(!table.grant_at("a", 2.0, Duration::from_secs(u64::MAX), t0));
        assert_eq!(table.active(), 0);
        assert!(table.grant_at("a", 2.0, Duration::from_secs(60), t0));
    }

    #[test]
    fn test_expired_entries_dropped_on_write() {
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(400);

        let boosts = BoostTable::new();
        for user in ["a", "b", "c"] {
            boosts.grant_at(user, 2.0, Duration::from_secs(60), t0);
        }
        assert_eq!(boosts.active(), 3);
        boosts.grant_at("d", 2.0, Duration::from_secs(60), later);
        assert_eq!(boosts.active(), 1);

        let tiers = PurchaseTiers::new(WeightConfig::default().purchase_tiers, Duration::from_secs(300));
        for user in ["a", "b", "c"] {
            tiers.record_purchase_at(user, 1.0, t0);
        }
        assert_eq!(tiers.tracked(), 3);
        tiers.record_purchase_at("d", 1.0, later);
        assert_eq!(tiers.tracked(), 1);
        assert_eq!(tiers.prune(later + Duration::from_secs(300)), 1);
        assert_eq!(tiers.tracked(), 0);
    }

    #[test]
    fn test_purchase_tiers() {
        let tiers = PurchaseTiers::from_config(&WeightConfig::default());
        assert_eq!(tiers.tier_weight(1.2), Some(5.0));
        assert_eq!(tiers.tier_weight(0.5), Some(3.0));
        assert_eq!(tiers.tier_weight(0.1), Some(2.0));
        assert_eq!(tiers.tier_weight(0.01), Some(1.5));
        assert_eq!(tiers.tier_weight(-1.0), None);
    }

    #[test]
    fn test_purchase_window() {
        let tiers = PurchaseTiers::new(WeightConfig::default().purchase_tiers, Duration::from_secs(300));
        let t0 = Instant::now();
        tiers.record_purchase_at("whale", 2.0, t0);
        assert_eq!(tiers.weight_at("whale", t0 + Duration::from_secs(10)), 5.0);
        assert_eq!(tiers.weight_at("whale", t0 + Duration::from_secs(301)), 1.0);
        assert_eq!(tiers.tracked(), 0);
        assert_eq!(tiers.weight_at("nobody", t0), 1.0);
    }

    #[test]
    fn test_max_of_skips_failures() {
        let sources: Vec<Arc<dyn WeightResolver>> =
            vec![Arc::new(FixedWeight(2.0)), Arc::new(Failing), Arc::new(FixedWeight(1.5))];
        assert_eq!(MaxOf::new(sources).resolve_weight("u"), Ok(2.0));

        let failing: Vec<Arc<dyn WeightResolver>> = vec![Arc::new(Failing)];
        assert!(MaxOf::new(failing).resolve_weight("u").is_err());
        assert_eq!(MaxOf::default().resolve_weight("u"), Ok(1.0));
    }
}
