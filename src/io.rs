//! Loading database files from disk

use crate::config::VerifyConfig;
use crate::error::{NscdError, Result};
use crate::header::{DbHeader, HEADER_SIZE};
use crate::verify::{VerifiedDatabase, Verifier};
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A database file mapped read-only
///
/// The header is read with an ordinary `read` before mapping so that the
/// verifier can compare it with what the mapping shows.
pub struct DatabaseFile {
    mmap: Mmap,
    header: DbHeader,
    path: PathBuf,
}

impl DatabaseFile {
    /// Open and map a database file, refusing files larger than `max_db_size`
    pub fn open<P: AsRef<Path>>(path: P, max_db_size: u64) -> Result<Self> {
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();

        let mut buffer = [0u8; HEADER_SIZE];
        let read = read_full(&mut file, &mut buffer)?;
        if read < HEADER_SIZE {
            return Err(NscdError::ShortHeader {
                expected: HEADER_SIZE,
                actual: read,
            });
        }
        let header = DbHeader::from_bytes(&buffer)?;

        if header.is_uninitialized() {
            return Err(NscdError::UninitializedHeader);
        }
        if header.header_size != HEADER_SIZE as i32 {
            return Err(NscdError::HeaderSizeMismatch {
                expected: HEADER_SIZE,
                found: header.header_size,
            });
        }
        // Negative or overflowing sizes cannot be satisfied by any file
        let required = header.required_image_len().unwrap_or(u64::MAX);
        if required > file_len {
            return Err(NscdError::FileSizeMismatch {
                required,
                actual: file_len,
            });
        }
        if file_len > max_db_size {
            return Err(NscdError::ImageTooLarge(file_len));
        }

        // SAFETY: the mapping is read-only and its length is fixed here. It
        // is shared with the daemon, and nothing stops the daemon writing the
        // file while `bytes()` is borrowed; that case is outside what a `&[u8]`
        // promises and is accepted, not prevented. What holds is narrower:
        // every read the verifier makes is bounds-checked against lengths
        // taken before the walk, and the header snapshots are volatile reads
        // of the live mapping (`volatile_header`), so a writer that moves the
        // generation counter or any header field during the walk is reported
        // as `HeaderChanged` instead of being silently trusted.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(path = %path.as_ref().display(), len = mmap.len(), "Mapped database file");

        Ok(DatabaseFile {
            mmap,
            header,
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Header as read before mapping
    pub fn header(&self) -> &DbHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify the mapping, re-reading the header from live memory
    pub fn verify(&self, config: &VerifyConfig) -> Result<VerifiedDatabase<'_>> {
        let verifier = Verifier::new(config.clone());
        Ok(verifier.verify_with(self.bytes(), &self.header, || self.volatile_header())?)
    }

    /// Header bytes read straight from the mapping, bypassing any value the
    /// compiler may have cached from an earlier read of `bytes()`
    fn volatile_header(&self) -> Option<[u8; HEADER_SIZE]> {
        if self.mmap.len() < HEADER_SIZE {
            return None;
        }

        let base = self.mmap.as_ptr();
        let mut out = [0u8; HEADER_SIZE];
        for (i, byte) in out.iter_mut().enumerate() {
            // SAFETY: `i < HEADER_SIZE <= self.mmap.len()`, and the mapping
            // stays alive for the borrow of `self`
            *byte = unsafe { std::ptr::read_volatile(base.add(i)) };
        }
        Some(out)
    }
}

/// `read` until the buffer is full or the file ends
fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
