//! Loose objects: one zlib-compressed file per object under `objects/`.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use gitbarefs_core::object::{Id, Kind};
use gitbarefs_core::source::{Result, SourceError};

// Longest possible header: "commit " + 20 digits + NUL.
const MAX_HEADER_LEN: usize = 32;

pub(crate) fn object_path(git_dir: &Path, id: &Id) -> PathBuf {
    let hex = id.to_string();
    git_dir.join("objects").join(&hex[0..2]).join(&hex[2..])
}

/// Read a loose object, returning `None` if it isn't stored loose.
pub(crate) fn read(git_dir: &Path, id: &Id) -> Result<Option<(Kind, Vec<u8>)>> {
    let mut decoder = match open(git_dir, id)? {
        Some(decoder) => decoder,
        None => return Ok(None),
    };

    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| corrupt(id, &e.to_string()))?;

    let (kind, size, header_len) = parse_header(id, &raw)?;
    let body = raw.split_off(header_len);

    if body.len() as u64 != size {
        return Err(corrupt(id, "size does not match header"));
    }

    Ok(Some((kind, body)))
}

/// Read only the kind and size of a loose object.
pub(crate) fn read_header(git_dir: &Path, id: &Id) -> Result<Option<(Kind, u64)>> {
    let mut decoder = match open(git_dir, id)? {
        Some(decoder) => decoder,
        None => return Ok(None),
    };

    let mut raw = Vec::with_capacity(MAX_HEADER_LEN);
    let mut buf = [0u8; MAX_HEADER_LEN];

    while !raw.contains(&0) && raw.len() < MAX_HEADER_LEN {
        let n = decoder
            .read(&mut buf[..MAX_HEADER_LEN - raw.len()])
            .map_err(|e| corrupt(id, &e.to_string()))?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&buf[..n]);
    }

    let (kind, size, _) = parse_header(id, &raw)?;
    Ok(Some((kind, size)))
}

fn open(git_dir: &Path, id: &Id) -> Result<Option<ZlibDecoder<BufReader<File>>>> {
    match File::open(object_path(git_dir, id)) {
        Ok(file) => Ok(Some(ZlibDecoder::new(BufReader::new(file)))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_header(id: &Id, raw: &[u8]) -> Result<(Kind, u64, usize)> {
    let nul = raw
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| corrupt(id, "header is not terminated"))?;

    let header = &raw[..nul];
    let space = header
        .iter()
        .position(|b| *b == b' ')
        .ok_or_else(|| corrupt(id, "header has no size"))?;

    let kind = Kind::from_name(&header[..space])
        .ok_or_else(|| corrupt(id, "unknown object type"))?;

    let size = std::str::from_utf8(&header[space + 1..])
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| corrupt(id, "invalid size in header"))?;

    Ok((kind, size, nul + 1))
}

fn corrupt(id: &Id, reason: &str) -> SourceError {
    SourceError::Corrupt(format!("loose object {}: {}", id, reason))
}

/// The ID `git hash-object` would assign.
#[cfg(test)]
pub(crate) fn object_id(kind: Kind, content: &[u8]) -> Id {
    use sha1::{Digest, Sha1};

    let mut hasher = Sha1::new();
    hasher.update(format!("{} {}\0", kind, content.len()));
    hasher.update(content);

    Id::new(&hasher.finalize()[..]).unwrap()
}

/// Store a loose object the way `git hash-object -w` would.
#[cfg(test)]
pub(crate) fn write(git_dir: &Path, kind: Kind, content: &[u8]) -> Id {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let id = object_id(kind, content);
    let path = object_path(git_dir, &id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    write!(encoder, "{} {}\0", kind, content.len()).unwrap();
    encoder.write_all(content).unwrap();
    std::fs::write(path, encoder.finish().unwrap()).unwrap();

    id
}
