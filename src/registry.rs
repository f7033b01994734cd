pub mod container_registry;
pub mod record;
pub mod store;

pub use container_registry::{LoadReport, Registry};
pub use record::{ContainerKind, ContainerRecord, ContainerStatus, RecordFilter};
pub use store::{JsonFileStore, MemoryStore, RegistryStore};
