pub mod backend;
pub mod columnar;
pub mod local;
pub mod object;
pub mod snapshot_store;

pub use backend::{StorageBackend, METADATA_FILE};
pub use columnar::Dataset;
pub use local::LocalBackend;
pub use object::ObjectBackend;
pub use snapshot_store::SnapshotStore;
