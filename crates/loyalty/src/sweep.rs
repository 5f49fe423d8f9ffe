//! Batch evaluation over a member roster: dry-run previews and applying
//! decisions back onto member records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use xclub_core::loyalty::{Member, TierAction, TierDecision};
use xclub_core::{LoyaltyError, LoyaltyResult};

use crate::policy_store::PolicySnapshot;

/// A member the batch could not evaluate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepFailure {
    pub member_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepReport {
    pub policy_version: u64,
    pub evaluated: usize,
    pub upgrades: usize,
    pub downgrades: usize,
    pub unchanged: usize,
    pub decisions: Vec<TierDecision>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    fn record(&mut self, decision: TierDecision) {
        self.evaluated += 1;
        match decision.action {
            TierAction::Upgrade => self.upgrades += 1,
            TierAction::Downgrade => self.downgrades += 1,
            TierAction::None => self.unchanged += 1,
        }
        self.decisions.push(decision);
    }

    fn fail(&mut self, member_id: &str, error: &LoyaltyError) {
        warn!(member_id = %member_id, error = %error, "Member skipped in tier sweep");
        self.failures.push(SweepFailure {
            member_id: member_id.to_string(),
            error: error.to_string(),
        });
    }
}

/// Apply a decision to the member it was computed for. Returns whether the
/// tier changed; a `None` decision never changes it.
pub fn apply_decision(member: &mut Member, decision: &TierDecision) -> LoyaltyResult<bool> {
    if member.id != decision.member_id {
        return Err(LoyaltyError::Input(format!(
            "decision for member {} applied to member {}",
            decision.member_id, member.id
        )));
    }
    if member.current_tier != decision.current_tier {
        return Err(LoyaltyError::Input(format!(
            "member {} is {} but the decision was computed at {}",
            member.id, member.current_tier, decision.current_tier
        )));
    }

    match decision.action {
        TierAction::None => return Ok(false),
        TierAction::Upgrade => metrics::counter!("loyalty.tier_upgrades").increment(1),
        TierAction::Downgrade => metrics::counter!("loyalty.tier_downgrades").increment(1),
    }

    let old_tier = member.current_tier;
    member.current_tier = decision.recommended_tier;
    info!(
        member_id = %member.id,
        old = %old_tier,
        new = %member.current_tier,
        action = ?decision.action,
        "Tier changed"
    );
    Ok(true)
}

/// Evaluate every member against `snapshot` without changing anything.
///
/// The snapshot may be a candidate set that was never saved, which lets a
/// settings editor show what a change would do before activating it.
pub fn preview(members: &[Member], snapshot: &PolicySnapshot, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport {
        policy_version: snapshot.version(),
        ..Default::default()
    };
    for member in members {
        match snapshot.evaluate(member, now) {
            Ok(decision) => report.record(decision),
            Err(e) => report.fail(&member.id, &e),
        }
    }
    report
}

/// Evaluate and apply decisions in place.
pub fn sweep(members: &mut [Member], snapshot: &PolicySnapshot, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport {
        policy_version: snapshot.version(),
        ..Default::default()
    };
    for member in members.iter_mut() {
        let applied = snapshot
            .evaluate(member, now)
            .and_then(|decision| apply_decision(member, &decision).map(|_| decision));
        match applied {
            Ok(decision) => report.record(decision),
            Err(e) => report.fail(&member.id, &e),
        }
    }

    info!(
        version = report.policy_version,
        evaluated = report.evaluated,
        upgrades = report.upgrades,
        downgrades = report.downgrades,
        failures = report.failures.len(),
        "Tier sweep complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use xclub_core::loyalty::{Tier, TierPolicySet};

    /// Counts tier-change increments, ignores everything else.
    #[derive(Default)]
    struct TierChangeRecorder {
        changes: Arc<AtomicU64>,
    }

    struct Tally(Arc<AtomicU64>);

    impl metrics::CounterFn for Tally {
        fn increment(&self, value: u64) {
            self.0.fetch_add(value, Ordering::Relaxed);
        }

        fn absolute(&self, value: u64) {
            self.0.fetch_max(value, Ordering::Relaxed);
        }
    }

    impl Recorder for TierChangeRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            match key.name() {
                "loyalty.tier_upgrades" | "loyalty.tier_downgrades" => {
                    Counter::from_arc(Arc::new(Tally(self.changes.clone())))
                }
                _ => Counter::noop(),
            }
        }

        fn register_gauge(&self, _: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::noop()
        }

        fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::noop()
        }
    }

    fn snapshot() -> PolicySnapshot {
        PolicySnapshot::new(7, TierPolicySet::default()).unwrap()
    }

    fn roster(now: DateTime<Utc>) -> Vec<Member> {
        vec![
            Member::new("up", 1500.0, now - Duration::days(2), Tier::Silver),
            Member::new("down", 600.0, now - Duration::days(40), Tier::Gold),
            Member::new("same", 150.0, now - Duration::days(2), Tier::Bronze),
            Member::new("bad", 150.0, now + Duration::days(2), Tier::Bronze),
        ]
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let now = Utc::now();
        let members = roster(now);
        let report = preview(&members, &snapshot(), now);

        assert_eq!(report.policy_version, 7);
        assert_eq!(report.evaluated, 3);
        assert_eq!(report.upgrades, 1);
        assert_eq!(report.downgrades, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].member_id, "bad");
        assert_eq!(members, roster(now));
    }

    #[test]
    fn test_sweep_applies_decisions() {
        let now = Utc::now();
        let mut members = roster(now);
        let report = sweep(&mut members, &snapshot(), now);

        assert_eq!(report.upgrades, 1);
        assert_eq!(members[0].current_tier, Tier::Gold);
        assert_eq!(members[1].current_tier, Tier::Silver);
        assert_eq!(members[2].current_tier, Tier::Bronze);
        assert_eq!(members[3].current_tier, Tier::Bronze);
    }

    #[test]
    fn test_second_sweep_is_stable() {
        let now = Utc::now();
        let mut members = roster(now);
        members.pop();
        sweep(&mut members, &snapshot(), now);
        let again = sweep(&mut members, &snapshot(), now);
        assert_eq!(again.upgrades, 0);
        // The downgraded Silver member is still past Silver's threshold.
        assert_eq!(again.downgrades, 1);
        assert_eq!(members[1].current_tier, Tier::Bronze);
    }

    #[test]
    fn test_apply_none_is_idempotent() {
        let now = Utc::now();
        let mut member = Member::new("same", 150.0, now - Duration::days(1), Tier::Bronze);
        let decision = snapshot().evaluate(&member, now).unwrap();
        assert_eq!(decision.action, TierAction::None);
        for _ in 0..3 {
            assert!(!apply_decision(&mut member, &decision).unwrap());
            assert_eq!(member.current_tier, Tier::Bronze);
        }
    }

    #[test]
    fn test_apply_rejects_wrong_member_or_stale_tier() {
        let now = Utc::now();
        let mut a = Member::new("a", 1500.0, now - Duration::days(1), Tier::Silver);
        let mut b = Member::new("b", 1500.0, now - Duration::days(1), Tier::Silver);
        let decision = snapshot().evaluate(&a, now).unwrap();

        assert!(apply_decision(&mut b, &decision).is_err());
        assert!(apply_decision(&mut a, &decision).unwrap());
        // Already applied; the member has moved on from the decision's tier.
        assert!(apply_decision(&mut a, &decision).is_err());
    }

    #[test]
    fn test_tier_changes_counted_only_when_applied() {
        let recorder = TierChangeRecorder::default();
        let now = Utc::now();
        let mut members = roster(now);

        metrics::with_local_recorder(&recorder, || {
            let report = preview(&members, &snapshot(), now);
            assert_eq!(report.upgrades + report.downgrades, 2);
        });
        assert_eq!(recorder.changes.load(Ordering::Relaxed), 0);

        metrics::with_local_recorder(&recorder, || {
            sweep(&mut members, &snapshot(), now);
        });
        assert_eq!(recorder.changes.load(Ordering::Relaxed), 2);
    }
}
