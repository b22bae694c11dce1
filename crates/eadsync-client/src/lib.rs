pub mod aspace;
pub mod config;
pub mod index;

pub use aspace::ReqwestArchivesSpace;
pub use config::{AspaceConfig, IndexConfig};
pub use index::ReqwestIndexClient;
