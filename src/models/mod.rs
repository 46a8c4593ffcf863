pub mod commit;
pub mod repository;
pub mod snapshot;

pub use commit::*;
pub use repository::*;
pub use snapshot::*;
