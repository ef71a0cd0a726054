//! Settle object store client contract.
//!
//! The orchestrator talks to the remote object store exclusively through [`ObjectStore`].
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: a versioned in-process store, used by tests and dry runs
//! - [`HttpObjectStore`]: a REST client using Kubernetes-style resource paths
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use settle_api::{CallContext, MemoryStore, ObjectStore};
//! use settle_types::ObjectKey;
//!
//! let store = MemoryStore::new();
//! let context = CallContext::background();
//! let document = json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "demo" } });
//! let stored = store.create(&context, &document)?;
//! assert_eq!(stored["metadata"]["resourceVersion"], "1");
//!
//! let key = ObjectKey::from_document(&document)?;
//! assert!(store.get(&context, &key).is_ok());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod context;
mod error;
mod http;
mod memory;
mod store;

pub use context::CallContext;
pub use error::StoreError;
pub use http::{HttpObjectStore, STORE_TOKEN_ENV, STORE_URL_ENV};
pub use memory::MemoryStore;
pub use store::ObjectStore;
