//! Hierarchical task store library.
//!
//! Tasks form a hierarchy addressed by dot-separated numeric IDs, carry
//! status/readiness/tags/metadata, and can be linked by typed dependency
//! edges. The store keeps sibling numbering contiguous across deletions
//! and renames, and ships a similarity engine for detecting and merging
//! near-duplicate tasks.

pub mod config;
pub mod db;
pub mod dedupe;
pub mod error;
pub mod format;
pub mod logging;
pub mod similarity;
pub mod types;
