//! Read-only member directory queries backing the dashboard and the member
//! list: tier filters, per-tier counts, search, and headline totals.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use xclub_core::loyalty::{Member, MemberStatus, Tier, TierPolicySet};
use xclub_core::{LoyaltyError, LoyaltyResult};

use crate::engine::member_status;

/// Tier filter from the member list toolbar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierFilter {
    All,
    Tier(Tier),
}

impl FromStr for TierFilter {
    type Err = LoyaltyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(TierFilter::All)
        } else {
            s.parse().map(TierFilter::Tier)
        }
    }
}

/// Headline numbers for the dashboard cards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectoryOverview {
    pub total_members: usize,
    pub active_members: usize,
    pub total_revenue: f64,
    pub members_per_tier: BTreeMap<Tier, usize>,
}

/// In-memory member directory.
#[derive(Debug, Clone, Default)]
pub struct MemberDirectory {
    members: Vec<Member>,
}

impl MemberDirectory {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }

    /// Load members from a JSON array file.
    pub fn load(path: &Path) -> LoyaltyResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let members: Vec<Member> = serde_json::from_str(&raw)?;
        debug!(path = %path.display(), count = members.len(), "Member directory loaded");
        Ok(Self::new(members))
    }

    /// The stock demo roster shown on a fresh install.
    pub fn demo() -> Self {
        let day = |y, m, d| -> DateTime<Utc> {
            NaiveDate::from_ymd_opt(y, m, d)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
                .unwrap_or_default()
        };
        let member = |id: &str, name: &str, email: &str, tier, points, spent, visit| Member {
            id: id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            total_spent: spent,
            last_visit: visit,
            current_tier: tier,
            points,
            joined_at: None,
        };

        Self::new(vec![
            member("1", "John Smith", "john.smith@example.com", Tier::Gold, 2500, 12_500.0, day(2024, 2, 15)),
            member("2", "Emma Wilson", "emma.w@example.com", Tier::Silver, 1200, 6000.0, day(2024, 2, 14)),
            member("3", "David Chen", "d.chen@example.com", Tier::Bronze, 500, 2500.0, day(2024, 2, 10)),
            member("4", "Sarah Miller", "sarah.m@example.com", Tier::Bronze, 250, 499.0, day(2024, 1, 20)),
        ])
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn into_members(self) -> Vec<Member> {
        self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn filter_by_tier(&self, filter: TierFilter) -> Vec<&Member> {
        self.members
            .iter()
            .filter(|m| match filter {
                TierFilter::All => true,
                TierFilter::Tier(t) => m.current_tier == t,
            })
            .collect()
    }

    /// Case-insensitive substring match on name or email.
    pub fn search(&self, query: &str) -> Vec<&Member> {
        self.query(TierFilter::All, Some(query))
    }

    /// Tier filter and search together, as the members page applies them.
    /// A blank or absent search matches everyone in the tier.
    pub fn query(&self, filter: TierFilter, search: Option<&str>) -> Vec<&Member> {
        let needle = search.map(|q| q.trim().to_lowercase()).unwrap_or_default();
        self.filter_by_tier(filter)
            .into_iter()
            .filter(|m| needle.is_empty() || matches_search(m, &needle))
            .collect()
    }

    /// Member count per tier. Every tier is present, zero if empty.
    pub fn tier_counts(&self) -> BTreeMap<Tier, usize> {
        let mut counts: BTreeMap<Tier, usize> = Tier::ALL.into_iter().map(|t| (t, 0)).collect();
        for m in &self.members {
            *counts.entry(m.current_tier).or_default() += 1;
        }
        counts
    }

    /// Highest lifetime spenders first.
    pub fn top_spenders(&self, limit: usize) -> Vec<&Member> {
        let mut sorted: Vec<&Member> = self.members.iter().collect();
        sorted.sort_by(|a, b| b.total_spent.total_cmp(&a.total_spent));
        sorted.truncate(limit);
        sorted
    }

    pub fn status(
        &self,
        member: &Member,
        policies: &TierPolicySet,
        now: DateTime<Utc>,
    ) -> LoyaltyResult<MemberStatus> {
        member_status(member, policies, now)
    }

    pub fn overview(&self, policies: &TierPolicySet, now: DateTime<Utc>) -> LoyaltyResult<DirectoryOverview> {
        let mut active_members = 0;
        for m in &self.members {
            if member_status(m, policies, now)? == MemberStatus::Active {
                active_members += 1;
            }
        }

        Ok(DirectoryOverview {
            total_members: self.members.len(),
            active_members,
            total_revenue: self.members.iter().map(|m| m.total_spent).sum(),
            members_per_tier: self.tier_counts(),
        })
    }
}

fn matches_search(member: &Member, needle: &str) -> bool {
    member.name.to_lowercase().contains(needle) || member.email.to_lowercase().contains(needle)
}
