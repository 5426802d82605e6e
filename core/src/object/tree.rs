use super::{parse_utils, FileMode, Id, Kind, ParseObjectError};

/// One entry of a git tree object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub id: Id,
    pub name: String,
}

impl TreeEntry {
    /// The kind of object this entry points to. Submodule entries point
    /// at a commit that typically doesn't exist in this repository.
    pub fn kind(&self) -> Kind {
        match self.mode {
            FileMode::Tree => Kind::Tree,
            FileMode::Submodule => Kind::Commit,
            _ => Kind::Blob,
        }
    }
}

/// Parse the binary content of a tree object.
///
/// Each entry is `<octal mode> SP <name> NUL <20-byte id>`. Names that are
/// not valid UTF-8 are converted lossily.
pub fn parse_tree(data: &[u8]) -> Result<Vec<TreeEntry>, ParseObjectError> {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let rest = &data[offset..];

        let nul = match rest.iter().position(|b| *b == 0) {
            Some(n) => n,
            None => return Err(ParseObjectError::Tree(offset)),
        };

        let line = &rest[0..nul];
        if !line.contains(&b' ') {
            return Err(ParseObjectError::Tree(offset));
        }

        let (mode, name) = parse_utils::split_once(line, &b' ');
        if name.is_empty() {
            return Err(ParseObjectError::Tree(offset));
        }

        let mode = match FileMode::from_octal_slice(mode) {
            Some(mode) => mode,
            None => return Err(ParseObjectError::Tree(offset)),
        };

        let id_start = nul + 1;
        if rest.len() < id_start + 20 {
            return Err(ParseObjectError::Tree(offset));
        }

        entries.push(TreeEntry {
            mode,
            id: Id::new(&rest[id_start..id_start + 20])?,
            name: String::from_utf8_lossy(name).into_owned(),
        });

        offset += id_start + 20;
    }

    Ok(entries)
}
