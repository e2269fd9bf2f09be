use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use osm_pbf_writer::osm::{Bounds, Member, Metadata, Node, Relation, Way};
use osm_pbf_writer::{PbfWriter, WriterOptions};

/// Write a synthetic .osm.pbf sample file: a grid of nodes, a way along the
/// first grid row and one relation tying them together.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Output path, e.g. sample.osm.pbf
    output: PathBuf,

    /// Number of grid nodes to generate
    #[arg(long, default_value_t = 10_000)]
    nodes: u32,

    /// Store nodes one message each instead of the dense layout
    #[arg(long)]
    sparse: bool,

    /// Store blobs raw instead of zlib-compressed
    #[arg(long)]
    uncompressed: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let options = WriterOptions {
        dense_nodes: !args.sparse,
        compression: !args.uncompressed,
        ..Default::default()
    };
    let mut writer = PbfWriter::from_path(&args.output, options)?;

    let bounds = Bounds {
        left: 13.0,
        bottom: 52.3,
        right: 13.8,
        top: 52.7,
    };
    writer.write_header(Some(&bounds))?;

    let metadata = Metadata {
        version: 1,
        timestamp: 1_700_000_000,
        changeset: 1,
        uid: 1,
        user: "sample".to_owned(),
        visible: true,
    };

    let side = (f64::from(args.nodes)).sqrt().ceil().max(1.0) as u32;
    for i in 0..args.nodes {
        let row = i / side;
        let col = i % side;
        let mut node = Node {
            id: i64::from(i) + 1,
            lon: bounds.left + (bounds.right - bounds.left) * f64::from(col) / f64::from(side),
            lat: bounds.bottom + (bounds.top - bounds.bottom) * f64::from(row) / f64::from(side),
            metadata: metadata.clone(),
            ..Default::default()
        };
        if i % 100 == 0 {
            node.tags.push(("amenity".to_owned(), "bench".to_owned()));
        }
        writer.write_node(&node)?;
    }

    let first_row: Vec<i64> = (1..=i64::from(side.min(args.nodes))).collect();
    writer.write_way(&Way {
        id: 1,
        refs: first_row.clone(),
        tags: vec![("highway".to_owned(), "residential".to_owned())],
        metadata: metadata.clone(),
    })?;

    writer.write_relation(&Relation {
        id: 1,
        members: first_row
            .iter()
            .map(|&ref_id| Member {
                kind: 'n',
                ref_id,
                role: "stop".to_owned(),
            })
            .chain(std::iter::once(Member {
                kind: 'w',
                ref_id: 1,
                role: String::new(),
            }))
            .collect(),
        tags: vec![("type".to_owned(), "route".to_owned())],
        metadata,
    })?;

    writer.finish()?;
    info!(path = %args.output.display(), nodes = args.nodes, "wrote sample file");
    Ok(())
}
