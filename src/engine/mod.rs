// OtaDeploy Engine - Core module structure
pub mod config;
pub mod release;
pub mod database;
pub mod version;
pub mod range;
pub mod storage;
pub mod signer;
pub mod builder;
pub mod notifier;
pub mod workspace;
pub mod pipeline;
pub mod distribution;
pub mod api;
pub mod cli;

pub use config::Config;
pub use database::{Database, MetadataStore};
pub use distribution::DistributionEndpoint;
pub use pipeline::{ReleaseOrchestrator, ReleaseRequest};
pub use storage::{FileObjectStore, ObjectStore};
