//! Process-wide tier policy state.
//!
//! The active policy set is an immutable, versioned snapshot behind an
//! `Arc`. Readers clone the `Arc` and evaluate without holding the lock;
//! saves validate the replacement and swap the pointer under the write lock,
//! so a reader sees either the old set or the new one, never a mix.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};
use xclub_core::loyalty::{Member, TierDecision, TierPolicy, TierPolicySet};
use xclub_core::{LoyaltyError, LoyaltyResult};

use crate::engine::{decide, validate_policy_set};

/// A published, validated policy set.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    version: u64,
    policies: TierPolicySet,
}

impl PolicySnapshot {
    /// Validate `policies` and wrap them as the given version.
    pub fn new(version: u64, policies: TierPolicySet) -> LoyaltyResult<Self> {
        validate_policy_set(&policies)?;
        Ok(Self::published(version, policies))
    }

    fn published(version: u64, policies: TierPolicySet) -> Self {
        Self { version, policies }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn policies(&self) -> &TierPolicySet {
        &self.policies
    }

    /// Evaluate a member against this snapshot. The set was validated on
    /// publication, so only member input can fail here.
    pub fn evaluate(&self, member: &Member, now: DateTime<Utc>) -> LoyaltyResult<TierDecision> {
        decide(member, &self.policies, self.version, now)
    }
}

/// Copy-on-write holder for the active policy snapshot.
pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyStore {
    /// Create a store whose first snapshot is version 1.
    pub fn new(policies: TierPolicySet) -> LoyaltyResult<Self> {
        let snapshot = PolicySnapshot::new(1, policies)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The active snapshot. Cheap; holds the read lock only for the clone.
    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Replace the active set wholesale. A rejected set leaves the previous
    /// snapshot in place.
    pub fn save(&self, policies: TierPolicySet) -> LoyaltyResult<Arc<PolicySnapshot>> {
        if let Err(e) = validate_policy_set(&policies) {
            Self::record_rejection(&e);
            return Err(e);
        }

        let mut current = self.current.write();
        Ok(Self::publish(&mut current, policies))
    }

    /// Save only if the active version is still `expected`. Used by editors
    /// that loaded a snapshot and must not overwrite a concurrent save.
    pub fn save_if_version(
        &self,
        expected: u64,
        policies: TierPolicySet,
    ) -> LoyaltyResult<Arc<PolicySnapshot>> {
        if let Err(e) = validate_policy_set(&policies) {
            Self::record_rejection(&e);
            return Err(e);
        }

        let mut current = self.current.write();
        if current.version != expected {
            let e = LoyaltyError::Conflict {
                expected,
                actual: current.version,
            };
            Self::record_rejection(&e);
            return Err(e);
        }
        Ok(Self::publish(&mut current, policies))
    }

    /// Replace one tier's policy. The edit is applied to a copy of the
    /// active set and the whole set is revalidated before publication.
    pub fn update_tier(&self, policy: TierPolicy) -> LoyaltyResult<Arc<PolicySnapshot>> {
        let mut current = self.current.write();
        let next = current.policies.with_policy(policy);
        if let Err(e) = validate_policy_set(&next) {
            Self::record_rejection(&e);
            return Err(e);
        }
        Ok(Self::publish(&mut current, next))
    }

    fn publish(current: &mut Arc<PolicySnapshot>, policies: TierPolicySet) -> Arc<PolicySnapshot> {
        let next = Arc::new(PolicySnapshot::published(current.version + 1, policies));
        *current = next.clone();

        metrics::counter!("loyalty.policy_saves").increment(1);
        info!(version = next.version, "Tier policy set activated");
        next
    }

    fn record_rejection(error: &LoyaltyError) {
        metrics::counter!("loyalty.policy_saves_rejected").increment(1);
        warn!(error = %error, "Tier policy save rejected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::thread;
    use xclub_core::loyalty::{Tier, TierAction};

    #[test]
    fn test_initial_version() {
        let store = PolicyStore::new(TierPolicySet::default()).unwrap();
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_invalid_initial_set_rejected() {
        let mut silver = TierPolicy::default_for(Tier::Silver);
        silver.min_spend = 0.0;
        let set = TierPolicySet::default().with_policy(silver);
        assert!(PolicyStore::new(set).is_err());
    }

    #[test]
    fn test_save_bumps_version() {
        let store = PolicyStore::new(TierPolicySet::default()).unwrap();
        let mut gold = TierPolicy::default_for(Tier::Gold);
        gold.discount_percent = 18.0;
        let snap = store.save(TierPolicySet::default().with_policy(gold)).unwrap();
        assert_eq!(snap.version(), 2);
        assert_eq!(store.snapshot().policies().get(Tier::Gold).discount_percent, 18.0);
    }

    #[test]
    fn test_rejected_save_keeps_previous_set() {
        let store = PolicyStore::new(TierPolicySet::default()).unwrap();
        let before = store.snapshot();

        let mut vip = TierPolicy::default_for(Tier::Vip);
        vip.min_spend = 900.0;
        assert!(store.save(TierPolicySet::default().with_policy(vip)).is_err());

        let after = store.snapshot();
        assert_eq!(after.version(), before.version());
        assert_eq!(after.policies(), before.policies());
    }

    #[test]
    fn test_held_snapshot_unaffected_by_save() {
        let store = PolicyStore::new(TierPolicySet::default()).unwrap();
        let held = store.snapshot();

        let mut silver = TierPolicy::default_for(Tier::Silver);
        silver.auto_upgrade = false;
        store.update_tier(silver).unwrap();

        let now = Utc::now();
        let member = Member::new("m-1", 600.0, now - Duration::days(2), Tier::Bronze);
        assert_eq!(held.evaluate(&member, now).unwrap().action, TierAction::Upgrade);
        assert_eq!(
            store.snapshot().evaluate(&member, now).unwrap().action,
            TierAction::None
        );
    }

    #[test]
    fn test_save_if_version_conflict() {
        let store = PolicyStore::new(TierPolicySet::default()).unwrap();
        store.save(TierPolicySet::default()).unwrap();

        let err = store.save_if_version(1, TierPolicySet::default()).unwrap_err();
        assert!(matches!(err, LoyaltyError::Conflict { expected: 1, actual: 2 }));
        assert!(store.save_if_version(2, TierPolicySet::default()).is_ok());
        assert_eq!(store.version(), 3);
    }

    #[test]
    fn test_update_tier_rejects_invalid_edit() {
        let store = PolicyStore::new(TierPolicySet::default()).unwrap();
        let mut bronze = TierPolicy::default_for(Tier::Bronze);
        bronze.downgrade_threshold_days = 5;
        assert!(store.update_tier(bronze).is_err());
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_concurrent_readers_see_consistent_sets() {
        let store = Arc::new(PolicyStore::new(TierPolicySet::default()).unwrap());

        // Two valid sets that differ in every tier's min_spend.
        let scaled = |factor: f64| {
            let list: Vec<TierPolicy> = TierPolicySet::default()
                .iter()
                .map(|p| TierPolicy {
                    min_spend: p.min_spend * factor,
                    ..*p
                })
                .collect();
            TierPolicySet::from_policies(&list).unwrap()
        };
        let a = scaled(1.0);
        let b = scaled(3.0);

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let set = if i % 2 == 0 { b } else { a };
                    store.save(set).unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = store.snapshot();
                        let set = snap.policies();
                        assert!(*set == a || *set == b);
                        assert!(validate_policy_set(set).is_ok());
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.version(), 201);
    }
}
