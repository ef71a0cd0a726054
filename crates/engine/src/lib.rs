//! # Settle Engine
//!
//! Declarative create/update/delete/get/list against an eventually-consistent object store,
//! for tests and scripts that need to set up state and then see it.
//!
//! ## Key Features
//!
//! - **Order-independent arguments**: templates, bindings, handles and durations may be
//!   passed in any order; each is placed by type and content
//! - **Template Interpolation**: YAML documents with `${{ ... }}` binding substitution
//! - **Confirmed mutations**: `*_and_wait` operations poll until the store shows the change
//! - **Categorized failures**: every error carries a category and a one-line diagnostic
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use settle_api::{CallContext, MemoryStore};
//! use settle_engine::{Orchestrator, args};
//! use settle_types::{Bindings, ResourceHandle};
//!
//! let orchestrator = Orchestrator::new(MemoryStore::new());
//! let context = CallContext::background();
//! let mut config_map = ResourceHandle::new();
//!
//! orchestrator.create_and_wait(
//!     &context,
//!     args![
//!         "
//!         apiVersion: v1
//!         kind: ConfigMap
//!         metadata:
//!           name: ${{ name }}
//!         data:
//!           mode: fast
//!         ",
//!         Bindings::new().with("name", "settings"),
//!         &mut config_map,
//!         Duration::from_secs(5),
//!     ],
//! );
//! assert!(config_map.resource_version().is_some());
//!
//! orchestrator.delete_and_wait(&context, args![&mut config_map]);
//! ```
//!
//! ## Architecture
//!
//! - **`args`**: argument classification, slot placement and per-operation validation
//! - **`bindings`**: layered binding merge
//! - **`render`**: template materialization
//! - **`copy`**: storing documents in caller handles
//! - **`orchestrator`**: the public operations and the eventual-consistency wait loop
//! - **`diagnostics`**: fatal failure reporting for waiting operations
//! - **`config`**: defaults from code, file and environment

pub mod args;
pub mod bindings;
pub mod config;
pub mod copy;
pub mod diagnostics;
pub mod error;
pub mod orchestrator;
pub mod render;

pub use args::{CallArgument, Operation, OperationProfile, Options, Slot, TemplateSource, resolve_arguments};
pub use bindings::merge_bindings;
pub use config::{ConfigError, OrchestratorConfig};
pub use copy::{DocumentCopier, StateCopier};
pub use diagnostics::{FATAL_TAG, FailureReporter, PanicReporter, failure_message};
pub use error::{ErrorCategory, OrchestrationError};
pub use orchestrator::{
    MutationKind, Orchestrator,
    wait::{Check, Predicate, WaitReport, WaitSpec, wait_for},
};
pub use render::{DocumentCount, InterpolatingRenderer, RenderError, TemplateRenderer};
