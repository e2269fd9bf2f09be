//! Streaming encoder producing `.osm.pbf` files.
//!
//! A file is one `OSMHeader` frame followed by `OSMData` frames. Incoming
//! entities are staged in a `PrimitiveBlock` with one group per entity kind;
//! nodes go into the columnar `DenseNodes` layout unless configured
//! otherwise. Strings are interned into the block's interim table and the
//! staged messages carry interim ids until the block is flushed, at which
//! point the frequency-sorted final table is built and every staged id is
//! rewritten in place. Delta coders for the dense columns live for exactly
//! one block.
//!
//! A block is flushed once it holds 8000 entities or its estimated size
//! approaches the blob limit, and a final partial block is flushed by
//! [`PbfWriter::finish`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use prost::Message;
use tracing::{debug, span, Level};

use crate::blob::{store_blob, BLOB_TYPE_DATA, BLOB_TYPE_HEADER, MAX_UNCOMPRESSED_BLOB_SIZE};
use crate::delta::Delta;
use crate::error::{EncodeError, Result};
use crate::osm::{Bounds, Entity, Metadata, Node, Relation, Way};
use crate::osm_pbf;
use crate::string_table::StringTable;

pub const FEATURE_OSM_SCHEMA: &str = "OsmSchema-V0.6";
pub const FEATURE_DENSE_NODES: &str = "DenseNodes";
pub const FEATURE_HISTORICAL_INFORMATION: &str = "HistoricalInformation";

/// Most entities a single block may hold. Osmosis and osmium both cap
/// blocks at 8k entities and readers are tuned for that, so we do the same.
pub const MAX_BLOCK_ENTITIES: u32 = 8000;

/// A block is flushed once its estimated size reaches this share of the
/// maximum blob size; the slack leaves room for the string table.
const BLOCK_FILL_PERCENT: usize = 95;

const BLOCK_SIZE_LIMIT: u32 = (MAX_UNCOMPRESSED_BLOB_SIZE * BLOCK_FILL_PERCENT / 100) as u32;

/// Nanodegrees per degree, the base resolution of the format.
const LONLAT_RESOLUTION: i64 = 1_000_000_000;

/// Output configuration, fixed for the lifetime of a writer.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Store nodes column-wise and delta-coded instead of one message each.
    pub dense_nodes: bool,
    /// zlib-deflate blob payloads. Raw blobs write faster but are 2-3x bigger.
    pub compression: bool,
    /// Write version/timestamp/changeset/uid/user metadata on every entity.
    pub metadata: bool,
    /// The file carries multiple versions per object. Adds per-object
    /// visible flags and the HistoricalInformation required feature.
    pub history: bool,
    /// Nanodegrees per coordinate unit. The default of 100 is about 1 cm at
    /// the equator, the resolution of the OSM database itself.
    pub location_granularity: i32,
    /// Milliseconds per timestamp unit.
    pub date_granularity: i32,
    /// Recorded in the header's writingprogram field.
    pub writing_program: String,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            dense_nodes: true,
            compression: true,
            metadata: true,
            history: false,
            location_granularity: 100,
            date_granularity: 1000,
            writing_program: concat!("osm-pbf-writer/", env!("CARGO_PKG_VERSION")).to_owned(),
        }
    }
}

/// Writer for one `.osm.pbf` file.
///
/// Call [`write_header`](Self::write_header) first, feed entities in the
/// usual nodes-ways-relations order, and call [`finish`](Self::finish) to
/// flush the residual block. Dropping the writer without `finish` leaves
/// the file truncated at the last complete frame.
pub struct PbfWriter<W: Write> {
    out: W,
    opts: WriterOptions,

    block: osm_pbf::PrimitiveBlock,
    // Positions of the per-kind groups inside the current block.
    nodes: Option<usize>,
    ways: Option<usize>,
    relations: Option<usize>,

    string_table: StringTable,
    delta_id: Delta<i64>,
    delta_lat: Delta<i64>,
    delta_lon: Delta<i64>,
    delta_timestamp: Delta<i64>,
    delta_changeset: Delta<i64>,
    delta_uid: Delta<i64>,
    delta_user_sid: Delta<i32>,

    entity_count: u32,
    estimated_size: u32,

    compression_buffer: Vec<u8>,
}

impl PbfWriter<BufWriter<File>> {
    /// Create the file at `path` and wrap it in a buffered writer.
    pub fn from_path(path: &Path, options: WriterOptions) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Ok(Self::new(file, options))
    }
}

impl<W: Write> PbfWriter<W> {
    pub fn new(out: W, options: WriterOptions) -> Self {
        Self {
            out,
            opts: options,
            block: osm_pbf::PrimitiveBlock::default(),
            nodes: None,
            ways: None,
            relations: None,
            string_table: StringTable::new(),
            delta_id: Delta::default(),
            delta_lat: Delta::default(),
            delta_lon: Delta::default(),
            delta_timestamp: Delta::default(),
            delta_changeset: Delta::default(),
            delta_uid: Delta::default(),
            delta_user_sid: Delta::default(),
            entity_count: 0,
            estimated_size: 0,
            compression_buffer: Vec::new(),
        }
    }

    pub fn options(&self) -> &WriterOptions {
        &self.opts
    }

    /// Emit the OSMHeader frame: schema features, writing program and the
    /// optional bounding box.
    ///
    /// The bbox is stored in fixed 10^-9 degree units; it does not follow
    /// `location_granularity`.
    pub fn write_header(&mut self, bounds: Option<&Bounds>) -> Result<()> {
        let _span = span!(Level::DEBUG, "write_header").entered();

        let mut header = osm_pbf::HeaderBlock::default();
        header.required_features.push(FEATURE_OSM_SCHEMA.to_owned());
        if self.opts.dense_nodes {
            header.required_features.push(FEATURE_DENSE_NODES.to_owned());
        }
        if self.opts.history {
            header
                .required_features
                .push(FEATURE_HISTORICAL_INFORMATION.to_owned());
        }
        header.writingprogram = Some(self.opts.writing_program.clone());

        if let Some(bounds) = bounds {
            header.bbox = Some(osm_pbf::HeaderBBox {
                left: (bounds.left * LONLAT_RESOLUTION as f64) as i64,
                right: (bounds.right * LONLAT_RESOLUTION as f64) as i64,
                top: (bounds.top * LONLAT_RESOLUTION as f64) as i64,
                bottom: (bounds.bottom * LONLAT_RESOLUTION as f64) as i64,
            });
        }

        debug!(features = ?header.required_features, "storing header block");
        let scratch = self.opts.compression.then_some(&mut self.compression_buffer);
        store_blob(&mut self.out, BLOB_TYPE_HEADER, &header, scratch)
    }

    pub fn write(&mut self, entity: &Entity) -> Result<()> {
        match entity {
            Entity::Node(node) => self.write_node(node),
            Entity::Way(way) => self.write_way(way),
            Entity::Relation(relation) => self.write_relation(relation),
        }
    }

    /// Stage a node. A rejected node leaves the writer untouched, so the
    /// caller may skip it and keep writing.
    pub fn write_node(&mut self, node: &Node) -> Result<()> {
        // Scale up front: past this point nothing can fail, and no group,
        // counter or string-table state exists for a rejected node.
        let lon = scale_coord(node.lon, self.opts.location_granularity)?;
        let lat = scale_coord(node.lat, self.opts.location_granularity)?;

        self.flush_if_full()?;
        self.entity_count += 1;
        let group = self.nodes_group();
        if self.opts.dense_nodes {
            self.write_dense_node(group, node, lon, lat);
        } else {
            self.write_sparse_node(group, node, lon, lat);
        }
        Ok(())
    }

    pub fn write_way(&mut self, way: &Way) -> Result<()> {
        self.flush_if_full()?;
        self.entity_count += 1;

        let mut pbf_way = osm_pbf::Way::default();
        apply_common_info(
            &mut pbf_way,
            way.id,
            &way.tags,
            &way.metadata,
            &self.opts,
            &mut self.string_table,
        );

        // Refs are delta-coded against the previous ref of the same way.
        let mut delta_ref = Delta::<i64>::default();
        pbf_way.refs = way.refs.iter().map(|&r| delta_ref.update(r)).collect();

        self.estimated_size += pbf_way.encoded_len() as u32;
        let group = self.ways_group();
        self.block.primitivegroup[group].ways.push(pbf_way);
        Ok(())
    }

    /// Stage a relation. A rejected relation leaves the writer untouched,
    /// so the caller may skip it and keep writing.
    pub fn write_relation(&mut self, relation: &Relation) -> Result<()> {
        // Validate every member kind up front: past this point nothing can
        // fail, and no counter or string-table state exists for a rejected
        // relation.
        let mut types = Vec::with_capacity(relation.members.len());
        for member in &relation.members {
            let member_type = match member.kind {
                'n' => osm_pbf::relation::MemberType::Node,
                'w' => osm_pbf::relation::MemberType::Way,
                'r' => osm_pbf::relation::MemberType::Relation,
                other => return Err(EncodeError::InvalidMemberType(other)),
            };
            types.push(member_type as i32);
        }

        self.flush_if_full()?;
        self.entity_count += 1;

        let mut pbf_relation = osm_pbf::Relation::default();
        apply_common_info(
            &mut pbf_relation,
            relation.id,
            &relation.tags,
            &relation.metadata,
            &self.opts,
            &mut self.string_table,
        );

        let mut delta_ref = Delta::<i64>::default();
        for member in &relation.members {
            pbf_relation
                .roles_sid
                .push(self.string_table.record(&member.role) as i32);
            pbf_relation.memids.push(delta_ref.update(member.ref_id));
        }
        pbf_relation.types = types;

        self.estimated_size += pbf_relation.encoded_len() as u32;
        let group = self.relations_group();
        self.block.primitivegroup[group].relations.push(pbf_relation);
        Ok(())
    }

    /// Flush the residual block and hand back the underlying output.
    pub fn finish(mut self) -> Result<W> {
        let _span = span!(Level::DEBUG, "finish").entered();
        if self.entity_count > 0 {
            self.flush_block()?;
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn write_sparse_node(&mut self, group: usize, node: &Node, lon: i64, lat: i64) {
        let mut pbf_node = osm_pbf::Node::default();
        apply_common_info(
            &mut pbf_node,
            node.id,
            &node.tags,
            &node.metadata,
            &self.opts,
            &mut self.string_table,
        );
        pbf_node.lon = lon;
        pbf_node.lat = lat;

        self.block.primitivegroup[group].nodes.push(pbf_node);
    }

    fn write_dense_node(&mut self, group: usize, node: &Node, lon: i64, lat: i64) {
        let dense = self.block.primitivegroup[group]
            .dense
            .get_or_insert_with(Default::default);

        dense.id.push(self.delta_id.update(node.id));
        dense.lon.push(self.delta_lon.update(lon));
        dense.lat.push(self.delta_lat.update(lat));

        // Tags are an interleaved key/value stream with a 0 after each
        // node, e.g. `3 5 2 1 0 0 8 5 0` for a node with two tags, one
        // without any and one with a single tag. Interim ids are >= 1, so
        // the separator is unambiguous.
        for (key, value) in &node.tags {
            dense.keys_vals.push(self.string_table.record(key) as i32);
            dense.keys_vals.push(self.string_table.record(value) as i32);
        }
        dense.keys_vals.push(0);

        if self.opts.metadata {
            let metadata = &node.metadata;
            let denseinfo = dense.denseinfo.get_or_insert_with(Default::default);
            denseinfo.version.push(metadata.version);
            if self.opts.history {
                denseinfo.visible.push(metadata.visible);
            }
            denseinfo.timestamp.push(
                self.delta_timestamp
                    .update(scale_timestamp(metadata.timestamp, self.opts.date_granularity)),
            );
            denseinfo
                .changeset
                .push(self.delta_changeset.update(metadata.changeset));
            denseinfo
                .uid
                .push(self.delta_uid.update(i64::from(metadata.uid)) as i32);
            // Interim id for now; the delta over final ids is computed when
            // the block's table is known.
            denseinfo
                .user_sid
                .push(self.string_table.record(&metadata.user) as i32);
        }
    }

    /// Flush the current block before it outgrows either limit. Called at
    /// the top of every write, i.e. a full block is flushed by the first
    /// entity that no longer fits.
    fn flush_if_full(&mut self) -> Result<()> {
        if self.entity_count >= MAX_BLOCK_ENTITIES {
            self.flush_block()?;
        } else if self.estimated_size > BLOCK_SIZE_LIMIT {
            debug!(
                entities = self.entity_count,
                estimated_size = self.estimated_size,
                "flushing early: block is near the blob size limit"
            );
            self.flush_block()?;
        }
        Ok(())
    }

    /// Serialize and emit the staged block, then reset all per-block state.
    fn flush_block(&mut self) -> Result<()> {
        let _span = span!(Level::DEBUG, "flush_block").entered();
        debug!(entities = self.entity_count, "storing primitive block");

        self.block.granularity = Some(self.opts.location_granularity);
        self.block.date_granularity = Some(self.opts.date_granularity);

        self.string_table.store(&mut self.block.stringtable);
        self.map_string_ids();

        let scratch = self.opts.compression.then_some(&mut self.compression_buffer);
        store_blob(&mut self.out, BLOB_TYPE_DATA, &self.block, scratch)?;

        self.block = osm_pbf::PrimitiveBlock::default();
        self.string_table.clear();
        self.delta_id.clear();
        self.delta_lat.clear();
        self.delta_lon.clear();
        self.delta_timestamp.clear();
        self.delta_changeset.clear();
        self.delta_uid.clear();
        self.delta_user_sid.clear();
        self.entity_count = 0;
        self.estimated_size = 0;
        self.nodes = None;
        self.ways = None;
        self.relations = None;
        Ok(())
    }

    /// Rewrite every staged interim string id to its final table index.
    fn map_string_ids(&mut self) {
        if let Some(index) = self.nodes {
            let group = &mut self.block.primitivegroup[index];
            for node in &mut group.nodes {
                map_common_ids(node, &self.string_table);
            }
            if let Some(dense) = group.dense.as_mut() {
                // Zeroes are per-node separators, not references.
                for sid in &mut dense.keys_vals {
                    if *sid > 0 {
                        *sid = self.string_table.map(*sid as u32) as i32;
                    }
                }
                if let Some(denseinfo) = dense.denseinfo.as_mut() {
                    for sid in &mut denseinfo.user_sid {
                        let final_id = self.string_table.map(*sid as u32) as i32;
                        *sid = self.delta_user_sid.update(final_id);
                    }
                }
            }
        }
        if let Some(index) = self.ways {
            for way in &mut self.block.primitivegroup[index].ways {
                map_common_ids(way, &self.string_table);
            }
        }
        if let Some(index) = self.relations {
            for relation in &mut self.block.primitivegroup[index].relations {
                map_common_ids(relation, &self.string_table);
                for sid in &mut relation.roles_sid {
                    *sid = self.string_table.map(*sid as u32) as i32;
                }
            }
        }
    }

    fn nodes_group(&mut self) -> usize {
        if let Some(index) = self.nodes {
            return index;
        }
        let index = self.push_group();
        self.nodes = Some(index);
        index
    }

    fn ways_group(&mut self) -> usize {
        if let Some(index) = self.ways {
            return index;
        }
        let index = self.push_group();
        self.ways = Some(index);
        index
    }

    fn relations_group(&mut self) -> usize {
        if let Some(index) = self.relations {
            return index;
        }
        let index = self.push_group();
        self.relations = Some(index);
        index
    }

    fn push_group(&mut self) -> usize {
        self.block
            .primitivegroup
            .push(osm_pbf::PrimitiveGroup::default());
        self.block.primitivegroup.len() - 1
    }
}

/// Shared shape of the three sparse entity messages, the seam for the
/// common id/tags/info handling.
trait PbfEntity {
    fn set_id(&mut self, id: i64);
    fn tags_mut(&mut self) -> (&mut Vec<u32>, &mut Vec<u32>);
    fn info_mut(&mut self) -> &mut Option<osm_pbf::Info>;
}

impl PbfEntity for osm_pbf::Node {
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
    fn tags_mut(&mut self) -> (&mut Vec<u32>, &mut Vec<u32>) {
        (&mut self.keys, &mut self.vals)
    }
    fn info_mut(&mut self) -> &mut Option<osm_pbf::Info> {
        &mut self.info
    }
}

impl PbfEntity for osm_pbf::Way {
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
    fn tags_mut(&mut self) -> (&mut Vec<u32>, &mut Vec<u32>) {
        (&mut self.keys, &mut self.vals)
    }
    fn info_mut(&mut self) -> &mut Option<osm_pbf::Info> {
        &mut self.info
    }
}

impl PbfEntity for osm_pbf::Relation {
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
    fn tags_mut(&mut self) -> (&mut Vec<u32>, &mut Vec<u32>) {
        (&mut self.keys, &mut self.vals)
    }
    fn info_mut(&mut self) -> &mut Option<osm_pbf::Info> {
        &mut self.info
    }
}

/// Stage id, tags and the optional info record, recording strings into the
/// interim table.
fn apply_common_info<T: PbfEntity>(
    out: &mut T,
    id: i64,
    tags: &[(String, String)],
    metadata: &Metadata,
    opts: &WriterOptions,
    string_table: &mut StringTable,
) {
    out.set_id(id);
    let (keys, vals) = out.tags_mut();
    for (key, value) in tags {
        keys.push(string_table.record(key));
        vals.push(string_table.record(value));
    }
    if opts.metadata {
        let mut info = osm_pbf::Info::default();
        if opts.history {
            info.visible = Some(metadata.visible);
        }
        info.version = Some(metadata.version);
        info.timestamp = Some(scale_timestamp(metadata.timestamp, opts.date_granularity));
        info.changeset = Some(metadata.changeset);
        info.uid = Some(metadata.uid);
        info.user_sid = Some(string_table.record(&metadata.user));
        *out.info_mut() = Some(info);
    }
}

/// Rewrite the interim ids staged by `apply_common_info`.
fn map_common_ids<T: PbfEntity>(object: &mut T, string_table: &StringTable) {
    if let Some(info) = object.info_mut().as_mut() {
        if let Some(sid) = info.user_sid {
            info.user_sid = Some(string_table.map(sid));
        }
    }
    let (keys, vals) = object.tags_mut();
    for key in keys.iter_mut() {
        *key = string_table.map(*key);
    }
    for value in vals.iter_mut() {
        *value = string_table.map(*value);
    }
}

/// Degrees to integer units of the block granularity, rounding half away
/// from zero.
fn scale_coord(degrees: f64, granularity: i32) -> Result<i64> {
    let scaled = (degrees * LONLAT_RESOLUTION as f64 / f64::from(granularity)).round();
    if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
        return Err(EncodeError::InvalidCoordinate(degrees));
    }
    Ok(scaled as i64)
}

/// Epoch seconds to integer units of the block date granularity.
fn scale_timestamp(seconds: i64, date_granularity: i32) -> i64 {
    (seconds as f64 * (1000.0 / f64::from(date_granularity))).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_scale_to_default_centimeter_units() {
        assert_eq!(scale_coord(13.5, 100).unwrap(), 135_000_000);
        assert_eq!(scale_coord(-13.5, 100).unwrap(), -135_000_000);
        assert_eq!(scale_coord(0.0, 100).unwrap(), 0);
    }

    #[test]
    fn coordinate_rounding_is_half_away_from_zero() {
        // 0.5 degrees is exactly half a unit at one-degree granularity,
        // with every intermediate value exactly representable.
        assert_eq!(scale_coord(0.5, 1_000_000_000).unwrap(), 1);
        assert_eq!(scale_coord(-0.5, 1_000_000_000).unwrap(), -1);
    }

    #[test]
    fn nan_coordinates_are_rejected() {
        assert!(matches!(
            scale_coord(f64::NAN, 100),
            Err(EncodeError::InvalidCoordinate(_))
        ));
        assert!(matches!(
            scale_coord(f64::INFINITY, 100),
            Err(EncodeError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn timestamps_scale_by_date_granularity() {
        assert_eq!(scale_timestamp(1_000_000_000, 1000), 1_000_000_000);
        assert_eq!(scale_timestamp(1_000_000_000, 2000), 500_000_000);
    }
}
