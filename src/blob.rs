//! Blob construction and wire framing.
//!
//! Every block leaves the writer as one frame: a 4-byte big-endian length,
//! the serialized `BlobHeader` of exactly that length, and the serialized
//! `Blob` of `datasize` bytes. The blob carries the block either raw or
//! zlib-deflated, together with its uncompressed size.

use std::io::Write;

use flate2::{Compress, Compression, FlushCompress, Status};
use prost::Message;
use tracing::trace;

use crate::error::{EncodeError, Result};
use crate::osm_pbf;

pub const BLOB_TYPE_HEADER: &str = "OSMHeader";
pub const BLOB_TYPE_DATA: &str = "OSMData";

/// Hard limit of the format on the uncompressed size of a single blob.
/// Blocks are flushed well before reaching it.
pub const MAX_UNCOMPRESSED_BLOB_SIZE: usize = 32 * 1024 * 1024;

/// Serialize `msg` into a blob and write the complete frame to `out`.
///
/// With `scratch` given the payload is zlib-deflated through it; the buffer
/// keeps its capacity and is reused across blocks. Without it the payload is
/// stored raw.
pub(crate) fn store_blob<W: Write, M: Message>(
    out: &mut W,
    blob_type: &str,
    msg: &M,
    scratch: Option<&mut Vec<u8>>,
) -> Result<()> {
    let data = msg.encode_to_vec();
    let raw_size = data.len() as i32;

    let mut blob = osm_pbf::Blob {
        raw_size: Some(raw_size),
        ..Default::default()
    };
    match scratch {
        Some(buf) => {
            zlib_compress(&data, buf)?;
            trace!(
                uncompressed = data.len(),
                compressed = buf.len(),
                "packed blob"
            );
            blob.zlib_data = Some(buf.clone());
        }
        None => {
            trace!(size = data.len(), "storing uncompressed blob");
            blob.raw = Some(data);
        }
    }

    let blob_bytes = blob.encode_to_vec();
    let header = osm_pbf::BlobHeader {
        r#type: blob_type.to_owned(),
        indexdata: None,
        datasize: blob_bytes.len() as i32,
    };
    let header_bytes = header.encode_to_vec();

    out.write_all(&(header_bytes.len() as u32).to_be_bytes())?;
    out.write_all(&header_bytes)?;
    out.write_all(&blob_bytes)?;
    Ok(())
}

/// Deflate `data` into `buf` as one complete zlib stream.
fn zlib_compress(data: &[u8], buf: &mut Vec<u8>) -> Result<()> {
    buf.clear();
    // Worst-case deflate expansion over incompressible input.
    buf.reserve(data.len() + (data.len() >> 12) + (data.len() >> 14) + 64);

    let mut stream = Compress::new(Compression::default(), true);
    match stream.compress_vec(data, buf, FlushCompress::Finish) {
        Ok(Status::StreamEnd) => Ok(()),
        Ok(status) => Err(EncodeError::Compression(format!(
            "deflate stopped before end of stream ({status:?})"
        ))),
        Err(e) => Err(EncodeError::Compression(e.to_string())),
    }
}
