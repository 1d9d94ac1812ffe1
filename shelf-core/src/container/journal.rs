use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::domain::CatalogEntry;
use crate::error::{CacheError, Result};
use crate::util::varint::{get_uvarint, put_uvarint};

const MAGIC: &[u8; 8] = b"SHLFLOG\0";
const VERSION: u8 = 1;
const HEADER_LEN: u64 = (MAGIC.len() + 1) as u64;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum LogRecord {
    Upsert(CatalogEntry),
    Remove { chapter_id: String },
}

/// Append-only catalog log: header, then `uvarint(len) || cbor(record)` frames.
pub struct Journal {
    f: File,
    path: PathBuf,
    /// Records appended since the file was created or last rewritten.
    pub records: u64,
}

impl Journal {
    /// Open (or create) the log and return every intact record.
    /// A torn tail from an interrupted append is cut off so later appends stay readable.
    pub fn open(path: &Path) -> Result<(Self, Vec<LogRecord>)> {
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if f.metadata()?.len() < HEADER_LEN || !header_ok(&mut f)? {
            if f.metadata()?.len() > 0 {
                tracing::warn!(path = %path.display(), "catalog journal header invalid; starting empty");
            }
            f.set_len(0)?;
            f.seek(SeekFrom::Start(0))?;
            write_header(&mut f)?;
            f.sync_data()?;
        }

        let file_len = f.metadata()?.len();
        f.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut recs = Vec::new();
        let mut good_end = HEADER_LEN;
        {
            let mut r = BufReader::new(&mut f);
            loop {
                match read_next_record(&mut r, file_len - good_end) {
                    Ok(Some((rec, frame_len))) => {
                        recs.push(rec);
                        good_end += frame_len;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "dropping unreadable catalog tail");
                        break;
                    }
                }
            }
        }
        if f.metadata()?.len() > good_end {
            tracing::warn!(
                path = %path.display(),
                at = good_end,
                "truncating torn catalog journal tail"
            );
            f.set_len(good_end)?;
            f.sync_data()?;
        }
        f.seek(SeekFrom::End(0))?;

        let records = recs.len() as u64;
        Ok((
            Self {
                f,
                path: path.to_path_buf(),
                records,
            },
            recs,
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and sync it. On failure the file is rolled back to its prior length.
    pub fn append(&mut self, rec: &LogRecord) -> Result<()> {
        let frame = encode_frame(rec)?;
        let pos = self.f.seek(SeekFrom::End(0))?;
        let res = self
            .f
            .write_all(&frame)
            .and_then(|_| self.f.flush())
            .and_then(|_| self.f.sync_data());
        if let Err(e) = res {
            if let Err(rb) = self.f.set_len(pos).and_then(|_| self.f.seek(SeekFrom::Start(pos))) {
                tracing::warn!(
                    path = %self.path.display(),
                    at = pos,
                    error = %rb,
                    "catalog journal rollback failed; tail will be cut at next open"
                );
            }
            return Err(e.into());
        }
        self.records += 1;
        Ok(())
    }

    /// Atomically replace the log with `recs` (temp file in the same dir, then rename).
    /// On failure the current file and handle are left untouched.
    pub fn rewrite<'a, I>(&mut self, recs: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a LogRecord>,
    {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        write_header(tmp.as_file_mut())?;
        let mut n = 0u64;
        for rec in recs {
            tmp.write_all(&encode_frame(rec)?)?;
            n += 1;
        }
        tmp.as_file().sync_all()?;
        let mut f = tmp.persist(&self.path).map_err(|e| CacheError::Io(e.error))?;
        f.seek(SeekFrom::End(0))?;
        self.f = f;
        self.records = n;
        Ok(())
    }
}

fn header_ok(f: &mut File) -> Result<bool> {
    f.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 8];
    f.read_exact(&mut magic)?;
    let mut ver = [0u8; 1];
    f.read_exact(&mut ver)?;
    Ok(&magic == MAGIC && ver[0] == VERSION)
}

fn write_header(f: &mut File) -> Result<()> {
    f.write_all(MAGIC)?;
    f.write_all(&[VERSION])?;
    f.flush()?;
    Ok(())
}

fn encode_frame(rec: &LogRecord) -> Result<Vec<u8>> {
    let plain = serde_cbor::to_vec(rec)
        .map_err(|e| CacheError::Format(format!("catalog record encode: {e}")))?;
    let mut frame = Vec::with_capacity(plain.len() + 10);
    put_uvarint(&mut frame, plain.len() as u64);
    frame.extend_from_slice(&plain);
    Ok(frame)
}

/// Next record and its on-disk frame length; `None` at EOF or on a short frame.
/// `remaining` is how many bytes the file still holds from the frame start.
fn read_next_record<R: Read>(r: &mut R, remaining: u64) -> Result<Option<(LogRecord, u64)>> {
    let Some(len) = get_uvarint(r)? else {
        return Ok(None);
    };
    let mut lenv = Vec::with_capacity(10);
    put_uvarint(&mut lenv, len);
    // A length running past the end of the file is a torn or corrupt frame.
    if len > remaining.saturating_sub(lenv.len() as u64) {
        return Ok(None);
    }

    let mut buf = vec![0u8; len as usize];
    if let Err(e) = r.read_exact(&mut buf) {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(e.into());
    }
    let rec: LogRecord = serde_cbor::from_slice(&buf)
        .map_err(|e| CacheError::Format(format!("catalog record decode: {e}")))?;
    Ok(Some((rec, lenv.len() as u64 + len)))
}
