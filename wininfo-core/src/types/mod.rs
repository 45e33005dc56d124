pub mod candidate;
pub mod ids;

pub use candidate::{Candidate, CandidateKind, CandidateSet};
pub use ids::{Category, EntityKey, SubscriptionId};
