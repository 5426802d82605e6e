//! Git object model: ids, kinds, modes, and the parsers a tree view needs.

mod commit;
pub use commit::{parse_commit, parse_tag_target, CommitInfo};

mod id;
pub use id::{Id, ParseIdError};

mod kind;
pub use kind::Kind;

mod mode;
pub use mode::{FileMode, ModeTable, ObjectMode};

pub(crate) mod parse_utils;

mod tree;
pub use tree::{parse_tree, TreeEntry};

use thiserror::Error;

/// Describes a git object whose content could not be understood.
#[derive(Debug, Error, PartialEq)]
pub enum ParseObjectError {
    #[error("malformed tree entry at byte {0}")]
    Tree(usize),

    #[error("object has no {0} header")]
    MissingHeader(&'static str),

    #[error("committer line has no valid timestamp")]
    BadTimestamp,

    #[error(transparent)]
    Id(#[from] ParseIdError),
}
