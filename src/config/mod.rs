mod loader;
mod types;

pub use loader::ConfigError;
pub use types::{BackendDefaults, Config, ContainerResources, NotebookConfig, RouterConfig};
