//! Structural verification of a persistent database image
//!
//! Nothing in the image is dereferenced before it passes a bounds and
//! alignment check. Verification is all-or-nothing: the only way to reach the
//! records of an image is through the [`VerifiedDatabase`] returned on
//! success.
//!
//! ```text
//! header snapshot ─▶ header sanity ─▶ bucket walk ─▶ entry count
//!                                       │  claim hash entry (usemap)
//!                                       │  check type / flags / key length
//!                                       │  claim data record (usemap)
//!                                       │  check record header and key
//!                                       └─ follow next (slow/fast cycle guard)
//!                 ─▶ orphan scan ─▶ header snapshot again
//! ```

use crate::config::VerifyConfig;
use crate::entry::{DataHead, HashEntry, RequestType};
use crate::error::{IntegrityError, ObjectKind, Result};
use crate::header::{DbHeader, BLOCK_ALIGN, DB_VERSION, ENDREF, HEADER_SIZE, REF_SIZE};
use crate::usemap::Usemap;
use serde::Serialize;
use std::ops::Range;
use tracing::{info, trace};

/// Counters gathered while walking the buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    /// Entries walked across all buckets
    pub entries: u64,
    /// Buckets with at least one entry
    pub buckets_used: usize,
    pub longest_chain: usize,
    /// Entries whose `first` flag is clear (they share a record)
    pub shared_references: u64,
}

/// A hash entry that passed every structural check
#[derive(Debug, Clone)]
pub struct VerifiedEntry {
    pub bucket: usize,
    /// Offset of the entry in the data region
    pub offset: u32,
    pub entry: HashEntry,
    pub service: RequestType,
    pub head: DataHead,
    record: Range<usize>,
    key: Range<usize>,
}

/// Borrowed view of one verified record
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    /// 1-based position in bucket walk order
    pub index: usize,
    pub entry: &'a VerifiedEntry,
    /// The full allocation, `allocsize` bytes, header included
    pub record: &'a [u8],
    pub key: &'a [u8],
}

/// An image whose structure has been verified
#[derive(Debug)]
pub struct VerifiedDatabase<'a> {
    header: DbHeader,
    data: &'a [u8],
    entries: Vec<VerifiedEntry>,
    summary: VerifySummary,
}

impl<'a> VerifiedDatabase<'a> {
    pub fn header(&self) -> &DbHeader {
        &self.header
    }

    pub fn summary(&self) -> &VerifySummary {
        &self.summary
    }

    pub fn entries(&self) -> &[VerifiedEntry] {
        &self.entries
    }

    /// Allocated part of the data region, `[0, first_free)`
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Records in bucket walk order
    pub fn records(&self) -> impl Iterator<Item = RecordView<'_>> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(move |(idx, entry)| RecordView {
                index: idx + 1,
                entry,
                record: &self.data[entry.record.clone()],
                key: &self.data[entry.key.clone()],
            })
    }
}

/// Structural verifier
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: VerifyConfig,
}

impl Verifier {
    pub fn new(config: VerifyConfig) -> Self {
        Verifier { config }
    }

    /// Verify `image` against the header the caller read from it earlier
    pub fn verify<'a>(
        &self,
        image: &'a [u8],
        header: &DbHeader,
    ) -> std::result::Result<VerifiedDatabase<'a>, IntegrityError> {
        self.verify_with(image, header, || header_bytes(image))
    }

    /// Verify `image`, taking both header snapshots from `reread`
    ///
    /// Loaders backed by a shared mapping pass a reader that goes to the
    /// live memory instead of the borrowed slice, so the second snapshot
    /// observes a writer that touched the file during the walk.
    pub fn verify_with<'a, F>(
        &self,
        image: &'a [u8],
        header: &DbHeader,
        mut reread: F,
    ) -> std::result::Result<VerifiedDatabase<'a>, IntegrityError>
    where
        F: FnMut() -> Option<[u8; HEADER_SIZE]>,
    {
        let short = || IntegrityError::ImageTooShort {
            required: HEADER_SIZE as u64,
            actual: image.len() as u64,
        };

        // Guards against a torn read before mapping
        let before = reread().ok_or_else(short)?;
        if before[..] != header.to_bytes()[..] {
            return Err(IntegrityError::HeaderMismatch);
        }

        self.check_header(header)?;

        // check_header bounds module and first_free
        let module = header.module as usize;
        let first_free = header.first_free as u32;
        let data_offset = header
            .data_offset()
            .ok_or(IntegrityError::ExcessiveModules(header.module))?;

        let required = data_offset + first_free as u64;
        if (image.len() as u64) < required {
            return Err(IntegrityError::ImageTooShort {
                required,
                actual: image.len() as u64,
            });
        }

        let table = &image[HEADER_SIZE..HEADER_SIZE + module * REF_SIZE];
        let data = &image[data_offset as usize..required as usize];

        let mut walk = Walk {
            data,
            usemap: Usemap::new(first_free),
            entries: Vec::new(),
            summary: VerifySummary::default(),
        };

        for (bucket, slot) in table.chunks_exact(REF_SIZE).enumerate() {
            let mut head = [0u8; REF_SIZE];
            head.copy_from_slice(slot);
            walk.chain(bucket, u32::from_ne_bytes(head))?;
        }

        if walk.summary.entries != header.nentries as u64 {
            return Err(IntegrityError::EntryCountMismatch {
                counted: walk.summary.entries,
                recorded: header.nentries,
            });
        }

        if let Some(offset) = walk.usemap.find_unreferenced() {
            return Err(IntegrityError::Unreferenced(offset));
        }

        // The writer may have touched the file while we were walking it
        if reread().ok_or_else(short)? != before {
            return Err(IntegrityError::HeaderChanged);
        }

        info!(
            entries = walk.summary.entries,
            buckets_used = walk.summary.buckets_used,
            first_free,
            "Database verified"
        );

        Ok(VerifiedDatabase {
            header: *header,
            data,
            entries: walk.entries,
            summary: walk.summary,
        })
    }

    /// Header sanity checks, in the order the daemon applies them
    fn check_header(&self, head: &DbHeader) -> std::result::Result<(), IntegrityError> {
        if head.version != DB_VERSION {
            return Err(IntegrityError::InvalidVersion(head.version));
        }

        if head.header_size != HEADER_SIZE as i32 {
            return Err(IntegrityError::HeaderSize {
                expected: HEADER_SIZE,
                found: head.header_size,
            });
        }

        let limit = self.config.timestamp_limit();
        if head.timestamp > limit {
            return Err(IntegrityError::FutureTimestamp {
                timestamp: head.timestamp,
                limit,
            });
        }

        if head.gc_cycle & 1 != 0 {
            return Err(IntegrityError::Mutating(head.gc_cycle));
        }

        if head.module == 0 {
            return Err(IntegrityError::NoModules);
        }

        let max_module = i32::MAX as u64 / REF_SIZE as u64;
        if head.module < 0 || head.module as u64 > max_module {
            return Err(IntegrityError::ExcessiveModules(head.module));
        }

        let table_size = head.module as u64 * REF_SIZE as u64;
        if head.data_size < 0 || head.data_size as u64 > i32::MAX as u64 - table_size {
            return Err(IntegrityError::DataSizeTooLarge {
                data_size: head.data_size,
                module: head.module,
            });
        }

        if head.first_free < 0 {
            return Err(IntegrityError::NegativeFirstFree(head.first_free));
        }

        if head.first_free > head.data_size {
            return Err(IntegrityError::FirstFreeBeyondDataSize {
                first_free: head.first_free,
                data_size: head.data_size,
            });
        }

        if head.first_free as u32 % BLOCK_ALIGN != 0 {
            return Err(IntegrityError::FirstFreeMisaligned(head.first_free));
        }

        if head.maxnentries < 0 {
            return Err(IntegrityError::NegativeMaxEntries(head.maxnentries));
        }

        if head.maxnsearched < 0 {
            return Err(IntegrityError::NegativeMaxSearched(head.maxnsearched));
        }

        Ok(())
    }
}

/// Verify with the default configuration
pub fn verify<'a>(
    image: &'a [u8],
    header: &DbHeader,
) -> std::result::Result<VerifiedDatabase<'a>, IntegrityError> {
    Verifier::default().verify(image, header)
}

/// Read the header from `image` itself and verify against it
pub fn open_image<'a>(image: &'a [u8], config: &VerifyConfig) -> Result<VerifiedDatabase<'a>> {
    let header = DbHeader::from_bytes(image)?;
    Ok(Verifier::new(config.clone()).verify(image, &header)?)
}

/// First `HEADER_SIZE` bytes of an in-memory image
fn header_bytes(image: &[u8]) -> Option<[u8; HEADER_SIZE]> {
    image.get(..HEADER_SIZE)?.try_into().ok()
}

/// State of one bucket walk over the data region
struct Walk<'a> {
    data: &'a [u8],
    usemap: Usemap,
    entries: Vec<VerifiedEntry>,
    summary: VerifySummary,
}

impl<'a> Walk<'a> {
    fn first_free(&self) -> u32 {
        self.data.len() as u32
    }

    fn slice(&self, kind: ObjectKind, offset: u32, len: usize) -> std::result::Result<&'a [u8], IntegrityError> {
        let start = offset as usize;
        self.data
            .get(start..start + len)
            .ok_or(IntegrityError::Unreadable { kind, offset })
    }

    /// Walk one bucket chain
    ///
    /// `trail` follows `work` at half speed; if the chain loops, `work`
    /// lands on `trail` within one lap.
    fn chain(&mut self, bucket: usize, head: u32) -> std::result::Result<(), IntegrityError> {
        let start = self.entries.len();
        let mut trail = head;
        let mut trail_idx = start;
        let mut work = head;
        let mut tick = false;

        while work != ENDREF {
            let next = self.entry(bucket, start, work)?;

            work = next;
            if work == trail {
                return Err(IntegrityError::CircularList {
                    bucket,
                    offset: work,
                });
            }

            if tick {
                trail_idx += 1;
                trail = self.entries[trail_idx].offset;
            }
            tick = !tick;
        }

        let chain_len = self.entries.len() - start;
        if chain_len > 0 {
            self.summary.buckets_used += 1;
            self.summary.longest_chain = self.summary.longest_chain.max(chain_len);
            trace!(bucket, chain_len, "Bucket walked");
        }

        Ok(())
    }

    /// Check the entry at `work` and its record, returning its `next`
    fn entry(&mut self, bucket: usize, chain_start: usize, work: u32) -> std::result::Result<u32, IntegrityError> {
        let first_free = self.first_free();

        match self
            .usemap
            .claim(ObjectKind::HashEntry, false, work, HashEntry::SIZE)
        {
            Err(IntegrityError::SharedHashEntry(offset))
                if self.entries[chain_start..].iter().any(|e| e.offset == offset) =>
            {
                // Re-entered this chain before the slow pointer caught up
                return Err(IntegrityError::CircularList { bucket, offset });
            }
            other => other?,
        }

        let entry = HashEntry::from_bytes(self.slice(ObjectKind::HashEntry, work, HashEntry::SIZE)?)
            .map_err(|_| IntegrityError::Unreadable {
                kind: ObjectKind::HashEntry,
                offset: work,
            })?;
        self.summary.entries += 1;

        let service = entry
            .request_type()
            .ok_or(IntegrityError::TypeOutOfBounds(entry.type_tag))?;
        if !service.is_stored() {
            return Err(IntegrityError::UnsupportedType(service.as_str()));
        }

        if entry.first > 1 {
            return Err(IntegrityError::InvalidBoolean {
                field: "first",
                value: entry.first,
            });
        }

        if entry.len < 0 {
            return Err(IntegrityError::NegativeKeyLength(entry.len));
        }

        let packet = entry.packet;
        if packet > first_free {
            return Err(IntegrityError::PacketBeyondFirstFree { packet, first_free });
        }
        if packet as u64 + DataHead::SIZE as u64 > first_free as u64 {
            return Err(IntegrityError::PacketHeaderBeyondFirstFree { packet, first_free });
        }
        if packet % BLOCK_ALIGN != 0 {
            return Err(IntegrityError::Misaligned {
                kind: ObjectKind::Data,
                offset: packet,
            });
        }

        let head = DataHead::from_bytes(self.slice(ObjectKind::Data, packet, DataHead::SIZE)?)
            .map_err(|_| IntegrityError::Unreadable {
                kind: ObjectKind::Data,
                offset: packet,
            })?;

        // A length below the header cannot be claimed meaningfully
        if head.allocsize < DataHead::SIZE as i32 {
            return Err(IntegrityError::ShortDataHeader(head.allocsize));
        }
        let allocsize = head.allocsize as usize;

        self.usemap
            .claim(ObjectKind::Data, entry.is_first(), packet, allocsize)?;

        if head.recsize > head.allocsize {
            return Err(IntegrityError::RecordLargerThanAllocation {
                recsize: head.recsize,
                allocsize: head.allocsize,
            });
        }
        if head.notfound > 1 {
            return Err(IntegrityError::InvalidBoolean {
                field: "notfound",
                value: head.notfound,
            });
        }
        if head.usable > 1 {
            return Err(IntegrityError::InvalidBoolean {
                field: "usable",
                value: head.usable,
            });
        }

        let record_start = packet as u64;
        let record_end = record_start + allocsize as u64;
        let key_start = entry.key as u64;
        let key_end = key_start + entry.len as u64;
        if key_start < record_start + DataHead::SIZE as u64
            || key_start > record_end
            || key_end > record_end
        {
            return Err(IntegrityError::KeyOutsideRecord {
                key: entry.key,
                len: entry.len,
                packet,
                allocsize: head.allocsize,
            });
        }

        if !entry.is_first() {
            self.summary.shared_references += 1;
        }

        self.entries.push(VerifiedEntry {
            bucket,
            offset: work,
            entry,
            service,
            head,
            record: record_start as usize..record_end as usize,
            key: key_start as usize..key_end as usize,
        });

        Ok(entry.next)
    }
}
