//! Reference-variant stores: building them from a release feed and querying them by
//! coordinate window.

pub mod build;
pub mod store;
pub mod synthetic;

pub use build::{BuildError, BuildOutputs, BuildStats, ReferenceBuilder};
pub use store::{MemoryStore, RangeQuery, StoreError, StoreRow, TabixStore, open_store};
pub use synthetic::SyntheticCoordinate;
