//! Shared types for Settle: resource identity, caller handles, bindings, selectors and
//! version markers. Everything here is pure data with no I/O.

pub mod bindings;
pub mod handle;
pub mod identity;
pub mod selector;
pub mod version;

pub use bindings::Bindings;
pub use handle::{CopyError, ResourceHandle, TypedResource, TypedShape};
pub use identity::{GroupVersionKind, IdentityError, ObjectKey};
pub use selector::ListSelector;
pub use version::ResourceVersion;
