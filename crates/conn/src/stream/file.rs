use super::{Available, ByteStream};
use crate::protocol::StreamError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::trace;

/// A file on disk read through a cursor.
///
/// The identity tag is derived from the file length and modification time, so a
/// rewritten file gets a new tag.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    pos: u64,
    len: u64,
    tag: Option<String>,
}

impl FileStream {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_file(file)
    }

    pub fn from_file(file: File) -> io::Result<Self> {
        let metadata = file.metadata()?;
        let len = metadata.len();
        let tag = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
            .map(|mtime| format!("\"{len:x}-{:x}\"", mtime.as_secs()));

        trace!(len, tag = ?tag, "open file stream");
        Ok(Self { file, pos: 0, len, tag })
    }

    pub fn identity_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn remaining_len(&self) -> u64 {
        self.len - self.pos
    }
}

impl ByteStream for FileStream {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let want = usize::try_from(self.remaining_len()).map_or(buf.len(), |r| r.min(buf.len()));
        if want == 0 {
            return Ok(0);
        }
        let n = self.file.read(&mut buf[..want])?;
        if n == 0 {
            // truncated underneath us
            self.len = self.pos;
        }
        self.pos += n as u64;
        Ok(n)
    }

    fn peek(&mut self) -> Result<Option<u8>, StreamError> {
        if self.remaining_len() == 0 {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        let n = self.file.read(&mut byte)?;
        if n == 0 {
            self.len = self.pos;
            return Ok(None);
        }
        self.file.seek(SeekFrom::Current(-1))?;
        Ok(Some(byte[0]))
    }

    fn seek_relative(&mut self, offset: i64) -> Result<(), StreamError> {
        let target = i64::try_from(self.pos).ok().and_then(|pos| pos.checked_add(offset));
        match target.and_then(|t| u64::try_from(t).ok()) {
            Some(t) if t <= self.len => {
                self.file.seek(SeekFrom::Start(t))?;
                self.pos = t;
                Ok(())
            }
            _ => Err(StreamError::OutOfRange { offset }),
        }
    }

    fn available(&self) -> Available {
        usize::try_from(self.remaining_len()).map_or(Available::Unknown, Available::Known)
    }

    fn is_finished(&self) -> bool {
        self.pos >= self.len
    }
}
