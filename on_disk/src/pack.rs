//! Pack files and their version 2 indexes.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use gitbarefs_core::object::{Id, Kind};
use gitbarefs_core::source::{Result, SourceError};

const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const IDX_HEADER_LEN: usize = 8;
const FANOUT_LEN: usize = 256 * 4;
const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;
const MAX_CHAIN: usize = 10_000;

// Sizes come from the pack itself, so buffers grow as data arrives
// beyond this much.
const MAX_PREALLOC: u64 = 1 << 20;

/// The lookup table from a `.idx` file.
#[derive(Debug)]
pub(crate) struct PackIndex {
    ids: Vec<Id>,
    offsets: Vec<u64>,
}

impl PackIndex {
    pub(crate) fn parse(data: &[u8]) -> Result<PackIndex> {
        if data.len() < IDX_HEADER_LEN + FANOUT_LEN || data[0..4] != IDX_MAGIC {
            return Err(SourceError::Corrupt("not a pack index".to_owned()));
        }

        if be_u32(&data[4..8]) != 2 {
            return Err(SourceError::Corrupt(
                "unsupported pack index version".to_owned(),
            ));
        }

        let count = be_u32(&data[IDX_HEADER_LEN + FANOUT_LEN - 4..]) as usize;
        let ids_start = IDX_HEADER_LEN + FANOUT_LEN;
        let crc_start = ids_start + count * 20;
        let offsets_start = crc_start + count * 4;
        let large_start = offsets_start + count * 4;

        if data.len() < large_start {
            return Err(SourceError::Corrupt("pack index is truncated".to_owned()));
        }

        let mut ids = Vec::with_capacity(count);
        for chunk in data[ids_start..crc_start].chunks(20) {
            ids.push(Id::new(chunk).map_err(|e| SourceError::Corrupt(e.to_string()))?);
        }

        let mut offsets = Vec::with_capacity(count);
        for chunk in data[offsets_start..large_start].chunks(4) {
            let small = be_u32(chunk);
            if small & 0x8000_0000 == 0 {
                offsets.push(small as u64);
            } else {
                let at = large_start + (small & 0x7fff_ffff) as usize * 8;
                if data.len() < at + 8 {
                    return Err(SourceError::Corrupt(
                        "pack index large offset out of range".to_owned(),
                    ));
                }
                offsets.push(be_u64(&data[at..at + 8]));
            }
        }

        Ok(PackIndex { ids, offsets })
    }

    /// Offset of `id` in the pack, if it is there.
    pub(crate) fn find(&self, id: &Id) -> Option<u64> {
        self.ids
            .binary_search(id)
            .ok()
            .map(|n| self.offsets[n])
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }
}

/// A pack file together with its index.
#[derive(Debug)]
pub(crate) struct Pack {
    path: PathBuf,
    index: PackIndex,
}

enum Entry {
    Base(Kind),
    OfsDelta(u64),
    RefDelta(Id),
}

struct EntryHeader {
    entry: Entry,
    size: u64,
}

impl Pack {
    /// Open the pack that belongs to the index at `idx_path`.
    pub(crate) fn open(idx_path: &Path) -> Result<Pack> {
        let index = PackIndex::parse(&fs::read(idx_path)?)?;
        let path = idx_path.with_extension("pack");

        let mut magic = [0u8; 4];
        File::open(&path)?.read_exact(&mut magic)?;
        if &magic != b"PACK" {
            return Err(SourceError::Corrupt(format!(
                "{} is not a pack file",
                path.display()
            )));
        }

        Ok(Pack { path, index })
    }

    pub(crate) fn find(&self, id: &Id) -> Option<u64> {
        self.index.find(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// Read and fully resolve the object at `offset`.
    ///
    /// `external` is asked for bases of `REF_DELTA` entries that live
    /// outside this pack.
    pub(crate) fn read_at(
        &self,
        offset: u64,
        external: &dyn Fn(&Id) -> Result<(Kind, Vec<u8>)>,
    ) -> Result<(Kind, Vec<u8>)> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let mut deltas = Vec::new();
        let mut offset = offset;

        let (kind, mut data) = loop {
            if deltas.len() > MAX_CHAIN {
                return Err(SourceError::Corrupt("delta chain too long".to_owned()));
            }

            let header = read_entry_header(&mut file, offset)?;
            let body = inflate(&mut file, header.size)?;

            match header.entry {
                Entry::Base(kind) => break (kind, body),
                Entry::OfsDelta(base) => {
                    deltas.push(body);
                    offset = base;
                }
                Entry::RefDelta(id) => {
                    deltas.push(body);
                    match self.index.find(&id) {
                        Some(base) => offset = base,
                        None => break external(&id)?,
                    }
                }
            }
        };

        for delta in deltas.iter().rev() {
            data = apply_delta(&data, delta)?;
        }

        Ok((kind, data))
    }

    /// Read the kind and size of the object at `offset` without
    /// reconstructing its content.
    pub(crate) fn header_at(
        &self,
        offset: u64,
        external: &dyn Fn(&Id) -> Result<(Kind, u64)>,
    ) -> Result<(Kind, u64)> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let mut size = None;
        let mut offset = offset;

        for _ in 0..MAX_CHAIN {
            let header = read_entry_header(&mut file, offset)?;

            // The first delta in the chain decides the final size.
            if !matches!(header.entry, Entry::Base(_)) && size.is_none() {
                size = Some(delta_target_size(&mut file)?);
            }

            match header.entry {
                Entry::Base(kind) => return Ok((kind, size.unwrap_or(header.size))),
                Entry::OfsDelta(base) => offset = base,
                Entry::RefDelta(id) => match self.index.find(&id) {
                    Some(base) => offset = base,
                    None => {
                        let (kind, base_size) = external(&id)?;
                        return Ok((kind, size.unwrap_or(base_size)));
                    }
                },
            }
        }

        Err(SourceError::Corrupt("delta chain too long".to_owned()))
    }
}

fn read_entry_header<R: Read + Seek>(file: &mut R, offset: u64) -> Result<EntryHeader> {
    file.seek(SeekFrom::Start(offset))?;

    let mut byte = read_byte(file)?;
    let kind = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as u64;
    let mut shift = 4;

    while byte & 0x80 != 0 {
        byte = read_byte(file)?;
        if shift > 57 {
            return Err(SourceError::Corrupt("pack entry size overflows".to_owned()));
        }
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }

    let entry = match kind {
        OFS_DELTA => {
            let mut byte = read_byte(file)?;
            let mut back = (byte & 0x7f) as u64;
            while byte & 0x80 != 0 {
                byte = read_byte(file)?;
                back = ((back + 1) << 7) | (byte & 0x7f) as u64;
            }

            if back == 0 || back > offset {
                return Err(SourceError::Corrupt(
                    "pack delta base offset out of range".to_owned(),
                ));
            }

            Entry::OfsDelta(offset - back)
        }
        REF_DELTA => {
            let mut id = [0u8; 20];
            file.read_exact(&mut id)?;
            Entry::RefDelta(Id::new(&id).map_err(|e| SourceError::Corrupt(e.to_string()))?)
        }
        n => Entry::Base(Kind::from_pack_type(n).ok_or_else(|| {
            SourceError::Corrupt(format!("unknown pack entry type {}", n))
        })?),
    };

    Ok(EntryHeader { entry, size })
}

fn read_byte<R: Read>(r: &mut R) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn inflate<R: Read>(r: &mut R, size: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
    ZlibDecoder::new(r)
        .take(size.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| SourceError::Corrupt(format!("pack entry: {}", e)))?;

    if out.len() as u64 != size {
        return Err(SourceError::Corrupt(
            "pack entry size does not match header".to_owned(),
        ));
    }

    Ok(out)
}

fn delta_target_size<R: Read>(r: &mut R) -> Result<u64> {
    // Two varints of at most ten bytes each.
    let mut prefix = Vec::with_capacity(20);
    ZlibDecoder::new(r)
        .take(20)
        .read_to_end(&mut prefix)
        .map_err(|e| SourceError::Corrupt(format!("pack entry: {}", e)))?;

    let mut pos = 0;
    read_varint(&prefix, &mut pos)?;
    read_varint(&prefix, &mut pos)
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0;

    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| SourceError::Corrupt("truncated delta header".to_owned()))?;
        *pos += 1;

        if shift > 63 {
            return Err(SourceError::Corrupt("delta size overflows".to_owned()));
        }
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// Apply a git delta to `base`.
pub(crate) fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let bad = |what: &str| SourceError::Corrupt(format!("bad delta: {}", what));

    let mut pos = 0;
    let source_size = read_varint(delta, &mut pos)?;
    let target_size = read_varint(delta, &mut pos)?;

    if source_size != base.len() as u64 {
        return Err(bad("base size mismatch"));
    }

    let mut out = Vec::with_capacity(target_size.min(MAX_PREALLOC) as usize);

    while pos < delta.len() {
        let op = delta[pos];
        pos += 1;

        if op & 0x80 != 0 {
            let mut offset = 0usize;
            let mut size = 0usize;

            for i in 0..4 {
                if op & (1 << i) != 0 {
                    let b = *delta.get(pos).ok_or_else(|| bad("truncated copy"))?;
                    offset |= (b as usize) << (8 * i);
                    pos += 1;
                }
            }

            for i in 0..3 {
                if op & (0x10 << i) != 0 {
                    let b = *delta.get(pos).ok_or_else(|| bad("truncated copy"))?;
                    size |= (b as usize) << (8 * i);
                    pos += 1;
                }
            }

            if size == 0 {
                size = 0x10000;
            }

            let chunk = offset
                .checked_add(size)
                .and_then(|end| base.get(offset..end))
                .ok_or_else(|| bad("copy out of range"))?;
            out.extend_from_slice(chunk);
        } else if op != 0 {
            let n = op as usize;
            let chunk = delta.get(pos..pos + n).ok_or_else(|| bad("truncated insert"))?;
            out.extend_from_slice(chunk);
            pos += n;
        } else {
            return Err(bad("reserved opcode"));
        }

        if out.len() as u64 > target_size {
            return Err(bad("result larger than declared"));
        }
    }

    if out.len() as u64 != target_size {
        return Err(bad("result size mismatch"));
    }

    Ok(out)
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn be_u64(b: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&b[0..8]);
    u64::from_be_bytes(bytes)
}
