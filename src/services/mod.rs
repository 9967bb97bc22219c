pub mod dependency_resolver;
pub mod registry;

pub use dependency_resolver::{DependencyError, DependencyResolver};
pub use registry::{DesiredState, ServiceRecord, ServiceRegistry};
