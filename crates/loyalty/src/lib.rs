//! Membership tier engine: policy validation, tier decisions, the
//! copy-on-write policy store, and the member queries the admin pages run.

pub mod directory;
pub mod engine;
pub mod policy_store;
pub mod sweep;

pub use directory::{DirectoryOverview, MemberDirectory, TierFilter};
pub use engine::{evaluate, validate_policy_list, validate_policy_set, LoyaltyEngine};
pub use policy_store::{PolicySnapshot, PolicyStore};
pub use sweep::{apply_decision, preview, sweep, SweepReport};
