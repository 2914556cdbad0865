//! # Forgeward
//!
//! Project authorization and repository lifecycle for a self-hosted git
//! forge, usable both as a library and through the `forgeward` binary.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! forgeward = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use forgeward::config::ForgeConfig;
//! use forgeward::lifecycle::{Git2Backend, NewProjectRequest, RepoSetLifecycle};
//! use forgeward::notify::LogNotifier;
//! use forgeward::store::{SqliteStore, Store};
//!
//! let config = ForgeConfig::default();
//! let store = SqliteStore::new(config.db_path()).unwrap();
//! store.initialize().unwrap();
//!
//! let folders = config.repo_folders();
//! let lifecycle =
//!     RepoSetLifecycle::new(&store, &Git2Backend, &LogNotifier, &config.naming, &folders);
//! let project = lifecycle
//!     .create_project(&NewProjectRequest::new("pingou", "test"))
//!     .unwrap();
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): builds the `forgeward` binary. Disable with
//!   `default-features = false`.

pub mod access;
pub mod config;
pub mod deploykeys;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod notify;
pub mod projects;
pub mod search;
pub mod store;
pub mod tokens;
pub mod types;
