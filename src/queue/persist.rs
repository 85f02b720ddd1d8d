//! Append-with-rewrite persistence for the [`super::RequestQueue`].
//!
//! The queue file is a sequence of JSON lines, each either an upsert of a
//! full entry or a tombstone removing one by key. On load, lines are
//! replayed in order, last write per key wins. [`rewrite`] compacts the file
//! down to just the entries currently live, bounding its growth.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::QueueEntry;
use crate::error::Result;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op")]
pub(super) enum LogLine {
    Upsert(QueueEntry),
    Remove { parent: String, name: String },
}

pub(super) fn load(path: &Path) -> Result<IndexMap<(String, String), QueueEntry>> {
    let mut entries = IndexMap::new();
    if !path.exists() {
        return Ok(entries);
    }

    let file = std::fs::File::open(path)?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogLine>(&line)? {
            LogLine::Upsert(entry) => {
                entries.insert((entry.parent.clone(), entry.name.clone()), entry);
            }
            LogLine::Remove { parent, name } => {
                entries.shift_remove(&(parent, name));
            }
        }
    }
    Ok(entries)
}

pub(super) fn append(path: &Path, line: &LogLine) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(line)?)?;
    Ok(())
}

pub(super) fn rewrite<'a>(
    path: &Path,
    entries: impl Iterator<Item = &'a QueueEntry>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    for entry in entries {
        writeln!(
            file,
            "{}",
            serde_json::to_string(&LogLine::Upsert(entry.clone()))?
        )?;
    }
    Ok(())
}
