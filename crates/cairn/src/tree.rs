//! Directory trees and their entries.
//!
//! A tree is the serialised form of one directory: an ordered list of nodes
//! plus the map of blob descriptors those nodes reference. Trees reference
//! each other (and file contents) only by id, so a snapshot becomes a
//! strictly acyclic DAG: parents point at children that already exist.
//! Nodes carry no back-references; traversal passes the owning tree
//! explicitly.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::backend::ObjectKind;
use crate::id::Id;
use crate::index::{Blob, BlobMap};
use crate::repo::{Repository, RepositoryError};

/// Errors raised when assembling trees
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("tree already contains an entry named {0:?}")]
    DuplicateName(String),
}

/// What a directory entry is, with the fields only that variant needs.
///
/// Serialises with a `type` tag next to the node's other fields, so the
/// on-disk form reads `{"name": ..., "type": "file", "content": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular file: plaintext ids of its data chunks, concatenated in
    /// order to yield the file bytes
    File {
        #[serde(default)]
        content: Vec<Id>,
    },
    /// Directory: id of the subtree object
    Dir { subtree: Id },
    Symlink {
        linktarget: String,
    },
    /// Block device
    Dev { major: u32, minor: u32 },
    /// Character device
    Chardev { major: u32, minor: u32 },
    Fifo,
    /// Sockets are recorded but never recreated
    Socket,
}

/// One directory entry.
///
/// `name` is the entry's file name, never a path. Shared metadata lives
/// here; variant-specific payload lives in [`NodeKind`]. Only the public
/// fields are persisted — zero-valued optional fields are omitted from the
/// JSON form, and names round-trip byte-exactly through standard string
/// escaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub mode: u32,
    #[serde(
        rename = "mtime",
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub mod_time: Option<OffsetDateTime>,
    #[serde(
        rename = "atime",
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_time: Option<OffsetDateTime>,
    #[serde(
        rename = "ctime",
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub change_time: Option<OffsetDateTime>,
    pub uid: u32,
    pub gid: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub inode: u64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub links: u64,
    /// Archival record of an error hit while reading this entry; metadata
    /// about the snapshot, not a runtime error
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

impl Node {
    /// A bare node of the given kind; metadata starts zeroed
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Node {
            name: name.into(),
            kind,
            mode: 0,
            mod_time: None,
            access_time: None,
            change_time: None,
            uid: 0,
            gid: 0,
            user: String::new(),
            group: String::new(),
            inode: 0,
            size: 0,
            links: 0,
            error: String::new(),
        }
    }

    /// Build a node from a stat result.
    ///
    /// Symlink targets and directory subtree ids cannot be derived from
    /// metadata alone; they start empty and the walker fills them in.
    #[cfg(unix)]
    pub fn from_metadata(name: impl Into<String>, meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

        let file_type = meta.file_type();
        let kind = if file_type.is_dir() {
            NodeKind::Dir {
                subtree: Id::default(),
            }
        } else if file_type.is_symlink() {
            NodeKind::Symlink {
                linktarget: String::new(),
            }
        } else if file_type.is_block_device() {
            let (major, minor) = split_rdev(meta.rdev());
            NodeKind::Dev { major, minor }
        } else if file_type.is_char_device() {
            let (major, minor) = split_rdev(meta.rdev());
            NodeKind::Chardev { major, minor }
        } else if file_type.is_fifo() {
            NodeKind::Fifo
        } else if file_type.is_socket() {
            NodeKind::Socket
        } else {
            NodeKind::File {
                content: Vec::new(),
            }
        };

        let size = if matches!(kind, NodeKind::File { .. }) {
            meta.len()
        } else {
            0
        };

        Node {
            name: name.into(),
            kind,
            mode: meta.permissions().mode() & 0o777,
            mod_time: timestamp(meta.mtime(), meta.mtime_nsec()),
            access_time: timestamp(meta.atime(), meta.atime_nsec()),
            change_time: timestamp(meta.ctime(), meta.ctime_nsec()),
            uid: meta.uid(),
            gid: meta.gid(),
            user: String::new(),
            group: String::new(),
            inode: meta.ino(),
            size,
            links: meta.nlink(),
            error: String::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir { .. })
    }

    /// Content ids of a file node
    pub fn content(&self) -> Option<&[Id]> {
        match &self.kind {
            NodeKind::File { content } => Some(content),
            _ => None,
        }
    }

    /// Subtree id of a dir node
    pub fn subtree(&self) -> Option<&Id> {
        match &self.kind {
            NodeKind::Dir { subtree } => Some(subtree),
            _ => None,
        }
    }

    /// The dedup shortcut: can an older node's content be reused without
    /// re-reading the file?
    ///
    /// Only file nodes qualify, and only when name, modification time,
    /// change time and inode are all unchanged. Every other kind reports
    /// false.
    pub fn same_content(&self, older: &Node) -> bool {
        if !self.is_file() || !older.is_file() {
            return false;
        }
        self.name == older.name
            && self.mod_time == older.mod_time
            && self.change_time == older.change_time
            && self.inode == older.inode
    }
}

#[cfg(unix)]
fn timestamp(secs: i64, nanos: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(secs as i128 * 1_000_000_000 + nanos as i128).ok()
}

/// Split a Linux `st_rdev` into device major and minor numbers
#[cfg(unix)]
fn split_rdev(rdev: u64) -> (u32, u32) {
    let major = ((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0xfff);
    let minor = ((rdev >> 12) & 0xffff_ff00) | (rdev & 0xff);
    (major as u32, minor as u32)
}

/// One serialised directory: ordered nodes plus the blob descriptors they
/// reference.
///
/// Nodes stay sorted by name so serialisation is deterministic. The map must
/// contain a descriptor for every id the nodes reference, which is what lets
/// a reader traverse offline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub map: BlobMap,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, keeping the list ordered by name
    pub fn insert(&mut self, node: Node) -> Result<(), TreeError> {
        match self
            .nodes
            .binary_search_by(|have| have.name.as_str().cmp(&node.name))
        {
            Ok(_) => Err(TreeError::DuplicateName(node.name)),
            Err(i) => {
                self.nodes.insert(i, node);
                Ok(())
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        self.nodes
            .binary_search_by(|have| have.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Load a tree object and merge its blob map into the repository index,
    /// so the ids it references resolve on subsequent loads
    pub async fn load(repo: &Repository, blob: &Blob) -> Result<Tree, RepositoryError> {
        let tree: Tree = repo.load_json_id(ObjectKind::Tree, &blob.id).await?;
        repo.index().merge(&tree.map)?;
        Ok(tree)
    }

    /// Serialise and store this tree, returning its blob descriptor
    pub async fn save(&self, repo: &Repository) -> Result<Blob, RepositoryError> {
        repo.save_json(ObjectKind::Tree, self).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn file_node(name: &str) -> Node {
        Node::new(
            name,
            NodeKind::File {
                content: Vec::new(),
            },
        )
    }

    #[test]
    fn test_node_json_shape() {
        let mut node = file_node("hello.txt");
        node.mode = 0o644;
        node.uid = 1000;
        node.gid = 1000;
        node.size = 6;
        if let NodeKind::File { content } = &mut node.kind {
            content.push(Id::digest(b"hello\n"));
        }

        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "file");
        assert_eq!(json["name"], "hello.txt");
        assert_eq!(json["content"][0], Id::digest(b"hello\n").to_hex());
        // zero-valued optional fields are omitted
        assert!(json.get("inode").is_none());
        assert!(json.get("linktarget").is_none());
        assert!(json.get("error").is_none());

        let back: Node = serde_json::from_value(json).unwrap();
        assert_eq!(node, back);
    }

    #[test]
    fn test_node_name_escaping_round_trip() {
        let node = file_node("a\nb");
        let bytes = serde_json::to_vec(&node).unwrap();
        let back: Node = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.name, "a\nb");

        let node = file_node("weird \" name \\ with \t controls");
        let bytes = serde_json::to_vec(&node).unwrap();
        let back: Node = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.name, node.name);
    }

    #[test]
    fn test_all_kinds_round_trip() {
        let kinds = [
            NodeKind::File {
                content: vec![Id::digest(b"c")],
            },
            NodeKind::Dir {
                subtree: Id::digest(b"t"),
            },
            NodeKind::Symlink {
                linktarget: "../target".into(),
            },
            NodeKind::Dev {
                major: 8,
                minor: 1,
            },
            NodeKind::Chardev {
                major: 1,
                minor: 3,
            },
            NodeKind::Fifo,
            NodeKind::Socket,
        ];
        for kind in kinds {
            let node = Node::new("entry", kind);
            let json = serde_json::to_string(&node).unwrap();
            let back: Node = serde_json::from_str(&json).unwrap();
            assert_eq!(node, back);
        }
    }

    #[test]
    fn test_same_content() {
        let now = OffsetDateTime::from_unix_timestamp(1_400_000_000).ok();
        let mut a = file_node("f");
        a.mod_time = now;
        a.change_time = now;
        a.inode = 42;
        let b = a.clone();
        assert!(a.same_content(&b));

        let mut renamed = b.clone();
        renamed.name = "g".into();
        assert!(!a.same_content(&renamed));

        let mut touched = b.clone();
        touched.mod_time = OffsetDateTime::from_unix_timestamp(1_400_000_001).ok();
        assert!(!a.same_content(&touched));

        let mut changed = b.clone();
        changed.change_time = OffsetDateTime::from_unix_timestamp(1_400_000_001).ok();
        assert!(!a.same_content(&changed));

        let mut moved = b.clone();
        moved.inode = 43;
        assert!(!a.same_content(&moved));

        // non-file kinds never match, even against themselves
        let dir = Node::new(
            "d",
            NodeKind::Dir {
                subtree: Id::default(),
            },
        );
        assert!(!dir.same_content(&dir.clone()));
        assert!(!a.same_content(&dir));
    }

    #[test]
    fn test_tree_keeps_nodes_sorted() {
        let mut tree = Tree::new();
        tree.insert(file_node("zeta")).unwrap();
        tree.insert(file_node("alpha")).unwrap();
        tree.insert(file_node("mid")).unwrap();

        let names: Vec<_> = tree.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
        assert!(tree.find("mid").is_some());
        assert!(tree.find("nope").is_none());
    }

    #[test]
    fn test_tree_rejects_duplicate_names() {
        let mut tree = Tree::new();
        tree.insert(file_node("same")).unwrap();
        assert!(matches!(
            tree.insert(file_node("same")),
            Err(TreeError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_tree_json_round_trip() {
        let mut tree = Tree::new();
        let blob = Blob {
            id: Id::digest(b"chunk"),
            storage_id: Id::digest(b"stored chunk"),
            size: 5,
        };
        tree.map.insert(blob).unwrap();
        let mut node = file_node("file");
        if let NodeKind::File { content } = &mut node.kind {
            content.push(blob.id);
        }
        tree.insert(node).unwrap();

        let json = serde_json::to_string(&tree).unwrap();
        let back: Tree = serde_json::from_str(&json).unwrap();
        assert_eq!(tree, back);
        assert!(back.map.contains(&Id::digest(b"chunk")));
    }

    #[cfg(unix)]
    #[test]
    fn test_from_metadata_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe");
        std::fs::write(&path, b"12345").unwrap();

        let meta = std::fs::symlink_metadata(&path).unwrap();
        let node = Node::from_metadata("probe", &meta);

        assert!(node.is_file());
        assert_eq!(node.size, 5);
        assert!(node.inode != 0);
        assert!(node.mod_time.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_metadata_dir_and_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("sub", &link).unwrap();

        let node = Node::from_metadata("sub", &std::fs::symlink_metadata(&sub).unwrap());
        assert!(node.is_dir());
        assert_eq!(node.size, 0);

        let node = Node::from_metadata("link", &std::fs::symlink_metadata(&link).unwrap());
        assert!(matches!(node.kind, NodeKind::Symlink { .. }));
    }
}
