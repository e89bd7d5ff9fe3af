pub mod builder;
pub use builder::{Cluster, Listener, Snapshot, SnapshotInput, build_snapshot};

pub mod cache;
pub use cache::SnapshotCache;
