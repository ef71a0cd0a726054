//! Utility helpers shared by the Settle crates: duration literals, text normalization,
//! JSON merge patch and the sync/async bridge.

pub mod async_runtime;
pub mod duration;
pub mod merge_patch;
pub mod path_processing;
pub mod text_processing;

pub use async_runtime::block_on;
pub use duration::{format_duration, parse_duration};
pub use merge_patch::apply_merge_patch;
pub use path_processing::expand_tilde;
pub use text_processing::{dedent, looks_like_document_path, preview};
