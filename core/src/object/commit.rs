use super::{parse_utils, Id, Kind, ParseObjectError};

/// The parts of a commit a mounted view needs: the root tree and the
/// committer timestamp used for every node's times.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommitInfo {
    pub id: Id,
    pub tree: Id,
    pub time: i64,
}

/// Parse the text of a commit object.
pub fn parse_commit(id: Id, data: &[u8]) -> Result<CommitInfo, ParseObjectError> {
    let mut tree = None;
    let mut time = None;

    for line in data.split(|b| *b == b'\n') {
        if line.is_empty() {
            // Headers end at the first blank line.
            break;
        }

        if let Some(tree_id) = parse_utils::header(line, b"tree") {
            tree = Some(Id::from_hex(tree_id)?);
        } else if let Some(committer) = parse_utils::header(line, b"committer") {
            time = Some(attribution_time(committer)?);
        }
    }

    Ok(CommitInfo {
        id,
        tree: tree.ok_or(ParseObjectError::MissingHeader("tree"))?,
        time: time.ok_or(ParseObjectError::MissingHeader("committer"))?,
    })
}

/// Parse the text of an annotated tag, returning the tagged object and its kind.
pub fn parse_tag_target(data: &[u8]) -> Result<(Id, Kind), ParseObjectError> {
    let mut object = None;
    let mut kind = None;

    for line in data.split(|b| *b == b'\n') {
        if line.is_empty() {
            break;
        }

        if let Some(value) = parse_utils::header(line, b"object") {
            object = Some(Id::from_hex(value)?);
        } else if let Some(value) = parse_utils::header(line, b"type") {
            kind = Kind::from_name(value);
        }
    }

    Ok((
        object.ok_or(ParseObjectError::MissingHeader("object"))?,
        kind.ok_or(ParseObjectError::MissingHeader("type"))?,
    ))
}

// "Name <email> 1234567890 +0000": the time is the second to last field.
fn attribution_time(value: &[u8]) -> Result<i64, ParseObjectError> {
    let after_email = match value.iter().rposition(|b| *b == b'>') {
        Some(n) => &value[n + 1..],
        None => return Err(ParseObjectError::BadTimestamp),
    };

    let text = std::str::from_utf8(after_email).map_err(|_| ParseObjectError::BadTimestamp)?;
    let mut fields = text.split_whitespace();

    fields
        .next()
        .and_then(|t| t.parse::<i64>().ok())
        .ok_or(ParseObjectError::BadTimestamp)
}
