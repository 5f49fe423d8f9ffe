//! Core tier engine: policy-set validation, tier eligibility, and
//! upgrade/downgrade decisions for a single member.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use xclub_core::config::LoyaltyConfig;
use xclub_core::loyalty::*;
use xclub_core::{LoyaltyError, LoyaltyResult};

use crate::policy_store::{PolicySnapshot, PolicyStore};

/// Reason recorded when spend qualifies for a tier whose auto-upgrade is off.
pub const UPGRADE_SUPPRESSED: &str = "upgrade suppressed by policy";

/// Policy version stamped on decisions made against an unpublished set.
pub const UNPUBLISHED_VERSION: u64 = 0;

// ─── Validation ─────────────────────────────────────────────────────────────

/// Check every invariant a policy set must hold before it can be activated.
pub fn validate_policy_set(policies: &TierPolicySet) -> LoyaltyResult<()> {
    let mut previous: Option<&TierPolicy> = None;

    for policy in policies.iter() {
        let tier = policy.tier;

        if !policy.discount_percent.is_finite()
            || policy.discount_percent < 0.0
            || policy.discount_percent > 100.0
        {
            return Err(LoyaltyError::Validation(format!(
                "{tier}: discount_percent must be within 0..=100, got {}",
                policy.discount_percent
            )));
        }
        if !policy.min_spend.is_finite() || policy.min_spend < 0.0 {
            return Err(LoyaltyError::Validation(format!(
                "{tier}: min_spend must be a non-negative amount, got {}",
                policy.min_spend
            )));
        }
        if policy.visit_frequency_days <= 0 {
            return Err(LoyaltyError::Validation(format!(
                "{tier}: visit_frequency_days must be positive, got {}",
                policy.visit_frequency_days
            )));
        }
        if policy.downgrade_threshold_days <= 0 {
            return Err(LoyaltyError::Validation(format!(
                "{tier}: downgrade_threshold_days must be positive, got {}",
                policy.downgrade_threshold_days
            )));
        }
        if policy.downgrade_threshold_days < policy.visit_frequency_days {
            return Err(LoyaltyError::Validation(format!(
                "{tier}: downgrade_threshold_days ({}) is shorter than visit_frequency_days ({})",
                policy.downgrade_threshold_days, policy.visit_frequency_days
            )));
        }

        if let Some(prev) = previous {
            if policy.min_spend <= prev.min_spend {
                return Err(LoyaltyError::Validation(format!(
                    "{tier}: min_spend {} must be greater than {} min_spend {}",
                    policy.min_spend, prev.tier, prev.min_spend
                )));
            }
        }
        previous = Some(policy);
    }

    Ok(())
}

/// Shape-check and validate a raw list of policies, as submitted by a
/// settings form.
pub fn validate_policy_list(policies: &[TierPolicy]) -> LoyaltyResult<TierPolicySet> {
    let set = TierPolicySet::from_policies(policies)?;
    validate_policy_set(&set)?;
    Ok(set)
}

// ─── Evaluation ─────────────────────────────────────────────────────────────

/// Highest tier whose `min_spend` the amount reaches. Bronze is the floor.
pub fn eligible_tier(policies: &TierPolicySet, total_spent: f64) -> Tier {
    Tier::ALL
        .into_iter()
        .rev()
        .find(|t| policies.get(*t).min_spend <= total_spent)
        .unwrap_or(Tier::Bronze)
}

/// Whole days since the member's last visit, truncated toward zero.
pub fn days_since_visit(member: &Member, now: DateTime<Utc>) -> LoyaltyResult<i64> {
    if member.last_visit > now {
        return Err(LoyaltyError::Input(format!(
            "member {}: last visit {} is after evaluation time {}",
            member.id,
            member.last_visit.to_rfc3339(),
            now.to_rfc3339()
        )));
    }
    Ok((now - member.last_visit).num_days())
}

/// Evaluate a member against a candidate policy set that has not been
/// published. The set is validated first.
pub fn evaluate(
    member: &Member,
    policies: &TierPolicySet,
    now: DateTime<Utc>,
) -> LoyaltyResult<TierDecision> {
    validate_policy_set(policies)?;
    decide(member, policies, UNPUBLISHED_VERSION, now)
}

/// Decision logic over an already validated policy set.
pub(crate) fn decide(
    member: &Member,
    policies: &TierPolicySet,
    version: u64,
    now: DateTime<Utc>,
) -> LoyaltyResult<TierDecision> {
    if !member.total_spent.is_finite() || member.total_spent < 0.0 {
        return Err(LoyaltyError::Input(format!(
            "member {}: total_spent must be a non-negative amount, got {}",
            member.id, member.total_spent
        )));
    }
    let days = days_since_visit(member, now)?;

    let current = member.current_tier;
    let eligible = eligible_tier(policies, member.total_spent);
    metrics::counter!("loyalty.tier_evaluations").increment(1);

    let decision = |recommended: Tier, action: TierAction, reason: String| TierDecision {
        member_id: member.id.clone(),
        current_tier: current,
        recommended_tier: recommended,
        eligible_tier: eligible,
        action,
        reason,
        days_since_visit: days,
        policy_version: version,
    };

    if eligible > current {
        if policies.get(eligible).auto_upgrade {
            debug!(member_id = %member.id, old = %current, new = %eligible, "Upgrade recommended");
            return Ok(decision(
                eligible,
                TierAction::Upgrade,
                format!(
                    "total spend {:.2} reaches {eligible} minimum of {:.2}",
                    member.total_spent,
                    policies.get(eligible).min_spend
                ),
            ));
        }

        // Spend still qualifies above the current tier, so inactivity cannot
        // pull the member down either.
        debug!(member_id = %member.id, tier = %current, eligible = %eligible, "Upgrade suppressed");
        return Ok(decision(
            current,
            TierAction::None,
            format!(
                "{UPGRADE_SUPPRESSED}: spend qualifies for {eligible} but auto-upgrade is disabled"
            ),
        ));
    }

    let current_policy = policies.get(current);
    if current_policy.auto_downgrade && days > current_policy.downgrade_threshold_days {
        let mut target = current;
        let mut next = current.lower();
        while let Some(t) = next {
            target = t;
            if policies.get(t).min_spend <= member.total_spent {
                break;
            }
            next = t.lower();
        }

        if target == current {
            debug!(member_id = %member.id, days, "Inactive member already at lowest tier");
            return Ok(decision(
                current,
                TierAction::None,
                format!("no visit for {days} days but {current} is the lowest tier"),
            ));
        }

        debug!(member_id = %member.id, old = %current, new = %target, days, "Downgrade recommended");
        return Ok(decision(
            target,
            TierAction::Downgrade,
            format!(
                "no visit for {days} days exceeds {current} downgrade threshold of {} days",
                current_policy.downgrade_threshold_days
            ),
        ));
    }

    debug!(
        member_id = %member.id,
        tier = %current,
        days_since_visit = days,
        "No tier change"
    );

    Ok(decision(current, TierAction::None, "tier unchanged".to_string()))
}

/// Whether a member has visited within their tier's required cadence.
pub fn member_status(
    member: &Member,
    policies: &TierPolicySet,
    now: DateTime<Utc>,
) -> LoyaltyResult<MemberStatus> {
    let days = days_since_visit(member, now)?;
    if days <= policies.get(member.current_tier).visit_frequency_days {
        Ok(MemberStatus::Active)
    } else {
        Ok(MemberStatus::Inactive)
    }
}

// ─── Engine Facade ──────────────────────────────────────────────────────────

/// Tier engine bound to the process-wide policy store.
pub struct LoyaltyEngine {
    enabled: bool,
    store: Arc<PolicyStore>,
}

impl LoyaltyEngine {
    /// Build the engine from configuration. Policies are validated before
    /// they become the active set.
    pub fn new(config: &LoyaltyConfig) -> LoyaltyResult<Self> {
        let policies = config.policy_set()?;
        let store = PolicyStore::new(policies).map_err(|e| {
            warn!(error = %e, "Configured tier policies rejected");
            e
        })?;
        info!(
            enabled = config.enabled,
            silver = store.snapshot().policies().get(Tier::Silver).min_spend,
            gold = store.snapshot().policies().get(Tier::Gold).min_spend,
            vip = store.snapshot().policies().get(Tier::Vip).min_spend,
            "Loyalty engine initialized"
        );
        Ok(Self {
            enabled: config.enabled,
            store: Arc::new(store),
        })
    }

    /// Evaluate a member against the policy set active at call time.
    ///
    /// With automation disabled in configuration the decision is always
    /// `None`, though the member input is still checked.
    pub fn evaluate_member(&self, member: &Member, now: DateTime<Utc>) -> LoyaltyResult<TierDecision> {
        let snapshot = self.store.snapshot();
        let mut decision = snapshot.evaluate(member, now)?;
        if !self.enabled && decision.is_transition() {
            decision.recommended_tier = member.current_tier;
            decision.action = TierAction::None;
            decision.reason = "tier automation disabled".to_string();
        }
        Ok(decision)
    }

    /// Discount the member currently receives.
    pub fn discount_for(&self, member: &Member) -> f64 {
        self.store
            .snapshot()
            .policies()
            .get(member.current_tier)
            .discount_percent
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.store.snapshot()
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }
}
