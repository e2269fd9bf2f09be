//! Writer for the OpenStreetMap `.osm.pbf` binary container format.
//!
//! The format nests data on two levels. The outer level is a sequence of
//! frames: a 4-byte big-endian size, a `BlobHeader` of exactly that size,
//! and a `Blob` whose payload is raw or zlib-compressed. The inner level is
//! the payload itself: one `HeaderBlock` first, then `PrimitiveBlock`s each
//! carrying a string table and groups of nodes, ways or relations. Strings
//! are referenced by index into the per-block table, which is sorted by use
//! count with index 0 reserved for the empty string.
//!
//! ```no_run
//! use osm_pbf_writer::osm::{Bounds, Node};
//! use osm_pbf_writer::{PbfWriter, WriterOptions};
//!
//! # fn main() -> osm_pbf_writer::Result<()> {
//! let mut writer = PbfWriter::from_path("out.osm.pbf".as_ref(), WriterOptions::default())?;
//! writer.write_header(Some(&Bounds { left: 13.0, bottom: 52.3, right: 13.8, top: 52.7 }))?;
//! writer.write_node(&Node { id: 1, lon: 13.4, lat: 52.5, ..Default::default() })?;
//! writer.finish()?;
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod delta;
pub mod error;
pub mod osm;
pub mod osm_pbf;
pub mod string_table;
pub mod writer;

pub use error::{EncodeError, Result};
pub use writer::{PbfWriter, WriterOptions};
