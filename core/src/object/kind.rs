use std::fmt::{self, Display, Formatter};

/// Describes the fundamental git object type (blob, tree, commit, or tag).
/// We use the word `kind` here to avoid conflict with the Rust reserved word `type`.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Kind {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl Kind {
    /// Parse the type name git uses in object headers and `cat-file` output.
    pub fn from_name(name: &[u8]) -> Option<Kind> {
        match name {
            b"blob" => Some(Kind::Blob),
            b"tree" => Some(Kind::Tree),
            b"commit" => Some(Kind::Commit),
            b"tag" => Some(Kind::Tag),
            _ => None,
        }
    }

    /// Convert from the numeric type used in pack file headers.
    pub fn from_pack_type(value: u8) -> Option<Kind> {
        match value {
            1 => Some(Kind::Commit),
            2 => Some(Kind::Tree),
            3 => Some(Kind::Blob),
            4 => Some(Kind::Tag),
            _ => None,
        }
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Kind::Blob => write!(f, "blob"),
            Kind::Tree => write!(f, "tree"),
            Kind::Commit => write!(f, "commit"),
            Kind::Tag => write!(f, "tag"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_string() {
        assert_eq!(Kind::Blob.to_string(), "blob");
        assert_eq!(Kind::Commit.to_string(), "commit");
        assert_eq!(Kind::Tree.to_string(), "tree");
        assert_eq!(Kind::Tag.to_string(), "tag");
    }

    #[test]
    fn from_name() {
        assert_eq!(Kind::from_name(b"blob"), Some(Kind::Blob));
        assert_eq!(Kind::from_name(b"tag"), Some(Kind::Tag));
        assert_eq!(Kind::from_name(b"Blob"), None);
    }

    #[test]
    fn from_pack_type() {
        assert_eq!(Kind::from_pack_type(1), Some(Kind::Commit));
        assert_eq!(Kind::from_pack_type(3), Some(Kind::Blob));
        assert_eq!(Kind::from_pack_type(6), None);
    }
}
