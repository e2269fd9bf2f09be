//! In-memory OSM entities as consumed by the writer.
//!
//! These are plain owned structs; the writer borrows them and never keeps
//! references past the call.

/// Version/provenance metadata shared by all entity kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub version: i32,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub changeset: i64,
    pub uid: i32,
    pub user: String,
    pub visible: bool,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            version: 0,
            timestamp: 0,
            changeset: 0,
            uid: 0,
            user: String::new(),
            visible: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub id: i64,
    /// Degrees.
    pub lon: f64,
    /// Degrees.
    pub lat: f64,
    pub tags: Vec<(String, String)>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Way {
    pub id: i64,
    /// Ids of the nodes the way passes through, in order.
    pub refs: Vec<i64>,
    pub tags: Vec<(String, String)>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Vec<(String, String)>,
    pub metadata: Metadata,
}

/// One relation member. `kind` is the conventional one-letter tag:
/// 'n' for nodes, 'w' for ways, 'r' for relations.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub kind: char,
    pub ref_id: i64,
    pub role: String,
}

/// Geographic extent advertised in the file header, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}
