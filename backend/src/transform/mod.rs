//! Transformation module.
//!
//! - Formula: sandboxed arithmetic for unit conversions
//! - Mapper: one source row to one target row
//! - Batch: many rows, tagged issues and aggregate stats
//! - Pipeline: CSV ingest, rule selection, mapping and export

pub mod batch;
pub mod formula;
pub mod mapper;
pub mod pipeline;

pub use batch::{map_batch, map_records};
pub use formula::Formula;
pub use mapper::{map_row, map_value};
pub use pipeline::*;
