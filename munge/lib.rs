#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod canonicalize;
pub mod columns;
pub mod config;
pub mod harmonize;
pub mod identity;
pub mod io;
pub mod liftover;
pub mod pipeline;
pub mod report;
pub mod types;
#[path = "../shared/files.rs"]
pub mod shared_files;
#[path = "../shared/tools.rs"]
pub mod shared_tools;
pub mod shared {
    pub use super::shared_files as files;
    pub use super::shared_tools as tools;
}

#[path = "../reference/mod.rs"]
pub mod reference;

#[path = "../annotate/mod.rs"]
pub mod annotate;
