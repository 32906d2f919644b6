pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod maintenance;
pub mod path;
pub mod repository;
pub mod resource;
pub mod storage;

pub use config::RepositoryConfig;
pub use error::{RepositoryError, Result};
pub use events::{EventBus, RepositoryEvent};
pub use maintenance::{MaintenanceReport, MaintenanceTask};
pub use path::Path;
pub use repository::Repository;
pub use resource::{Resource, ResourceId};
