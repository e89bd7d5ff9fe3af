pub mod inst;
pub use inst::{CommitOutcome, Plan, PlanError, Propagation, Rib};

pub mod action;
pub use action::Action;

pub mod peer;
pub use peer::{ConnectionStatus, PeerRecord};

pub mod route;
pub use route::{Candidate, InternalKey, InternalRoute, PathRef, RouteMetadata};
