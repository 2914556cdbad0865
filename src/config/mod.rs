mod forge;

pub use forge::{AccessPolicy, DatabaseConfig, FolderConfig, ForgeConfig, NamingPolicy};
