//! Turning a root-object name into a commit id.

use std::fs;
use std::io;
use std::path::Path;

use gitbarefs_core::object::{parse_tag_target, Id, Kind};
use gitbarefs_core::source::{Result, SourceError};

use crate::odb::Odb;

const MAX_SYMREF_DEPTH: usize = 5;

/// Resolve `name` to a commit the way `git cat-file` resolves
/// `<name>^{commit}`.
pub(crate) fn resolve(odb: &Odb, git_dir: &Path, name: &str) -> Result<Id> {
    let not_found = || SourceError::RefNotFound(name.to_owned());

    let id = match Id::from_hex(name) {
        Ok(id) => id,
        Err(_) => lookup(git_dir, name)?.ok_or_else(not_found)?,
    };

    peel_to_commit(odb, id).map_err(|e| match e {
        SourceError::ObjectNotFound(_) => not_found(),
        e => e,
    })
}

/// Find the id a ref name points at, trying the same prefixes git does.
pub(crate) fn lookup(git_dir: &Path, name: &str) -> Result<Option<Id>> {
    if !is_valid_name(name) {
        return Ok(None);
    }

    let packed = read_packed_refs(git_dir)?;

    for candidate in candidates(name) {
        if let Some(id) = read_ref(git_dir, &packed, &candidate, 0)? {
            return Ok(Some(id));
        }
    }

    Ok(None)
}

fn candidates(name: &str) -> Vec<String> {
    vec![
        name.to_owned(),
        format!("refs/{}", name),
        format!("refs/tags/{}", name),
        format!("refs/heads/{}", name),
        format!("refs/remotes/{}", name),
        format!("refs/remotes/{}/HEAD", name),
    ]
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('/')
        && !name.ends_with('/')
        && !name.split('/').any(|part| part.is_empty() || part == "." || part == "..")
}

fn read_ref(
    git_dir: &Path,
    packed: &[(String, Id)],
    name: &str,
    depth: usize,
) -> Result<Option<Id>> {
    if depth > MAX_SYMREF_DEPTH {
        return Ok(None);
    }

    let path = git_dir.join(name);
    if path.is_file() {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let content = content.trim_end();

        if let Some(target) = content.strip_prefix("ref: ") {
            return read_ref(git_dir, packed, target.trim(), depth + 1);
        }

        // Files like `config` sit next to `HEAD`; anything that isn't an
        // id isn't a ref.
        if let Ok(id) = Id::from_hex(content) {
            return Ok(Some(id));
        }
    }

    Ok(packed
        .iter()
        .find(|(packed_name, _)| packed_name == name)
        .map(|(_, id)| *id))
}

fn read_packed_refs(git_dir: &Path) -> Result<Vec<(String, Id)>> {
    let content = match fs::read_to_string(git_dir.join("packed-refs")) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(parse_packed_refs(&content))
}

fn parse_packed_refs(content: &str) -> Vec<(String, Id)> {
    content
        .lines()
        .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
        .filter_map(|line| {
            let (id, name) = line.split_once(' ')?;
            Some((name.trim().to_owned(), Id::from_hex(id).ok()?))
        })
        .collect()
}

fn peel_to_commit(odb: &Odb, mut id: Id) -> Result<Id> {
    // Tags of tags are legal; cap the walk so a cycle can't hang us.
    for _ in 0..=MAX_SYMREF_DEPTH * 10 {
        let (kind, data) = odb.read(&id)?;

        match kind {
            Kind::Commit => return Ok(id),
            Kind::Tag => {
                let (target, _) = parse_tag_target(&data)?;
                id = target;
            }
            _ => return Err(SourceError::ObjectNotFound(id)),
        }
    }

    Err(SourceError::Corrupt(format!("tag chain at {} is too long", id)))
}
