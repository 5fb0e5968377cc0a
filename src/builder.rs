//! Writer for well-formed database images
//!
//! Lays out records the way the daemon's bump allocator does: every object
//! is appended at the next 8-byte boundary of the data region and nothing is
//! ever freed. Used to produce fixtures for tests, benchmarks and fuzzing.

use crate::decode::{AddrInfo, HostLookup};
use crate::entry::{AddressFamily, DataHead, HashEntry, RequestType};
use crate::error::{NscdError, Result};
use crate::header::{DbHeader, ALIGN, BLOCK_ALIGN, ENDREF, HEADER_SIZE, REF_SIZE};
use std::net::IpAddr;

/// Slack left after `first_free` unless a data size is set explicitly
const DEFAULT_DATA_SLACK: usize = 256;

/// `first_free` and `data_size` are signed 32-bit fields
const MAX_DATA_SIZE: usize = i32::MAX as usize - DEFAULT_DATA_SLACK;

/// Location of a record written by [`ImageBuilder`], relative to the data region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    pub entry: u32,
    pub packet: u32,
    pub key: u32,
    pub key_len: i32,
    pub service: RequestType,
}

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    header: DbHeader,
    heads: Vec<u32>,
    tails: Vec<Option<u32>>,
    data: Vec<u8>,
    data_size: Option<usize>,
    expires: u64,
    nentries: usize,
    chain_lens: Vec<usize>,
}

impl ImageBuilder {
    /// Start an empty image with `module` buckets
    pub fn new(module: usize) -> Self {
        ImageBuilder {
            header: DbHeader::new(module as i32),
            heads: vec![ENDREF; module],
            tails: vec![None; module],
            data: Vec::new(),
            data_size: None,
            expires: 0,
            nentries: 0,
            chain_lens: vec![0; module],
        }
    }

    /// Header timestamp
    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.header.timestamp = timestamp;
        self
    }

    /// Expiry written into records added from now on
    pub fn expires(mut self, expires: u64) -> Self {
        self.expires = expires;
        self
    }

    /// Fixed data region size; must cover everything allocated
    pub fn data_size(mut self, size: usize) -> Self {
        self.data_size = Some(size);
        self
    }

    /// Header statistics counters
    pub fn counters(mut self, poshit: u64, neghit: u64, posmiss: u64, negmiss: u64) -> Self {
        self.header.poshit = poshit;
        self.header.neghit = neghit;
        self.header.posmiss = posmiss;
        self.header.negmiss = negmiss;
        self
    }

    /// Byte offset of the data region in the built image
    pub fn data_offset(&self) -> usize {
        HEADER_SIZE + (self.heads.len() * REF_SIZE).next_multiple_of(ALIGN)
    }

    /// Current bump pointer
    ///
    /// `alloc` keeps the region below `MAX_DATA_SIZE`, so this never truncates.
    pub fn first_free(&self) -> u32 {
        self.data.len() as u32
    }

    /// Allocate `len` zeroed bytes, returning their offset
    pub fn alloc(&mut self, len: usize) -> Result<u32> {
        let offset = self.data.len();
        let end = len
            .checked_next_multiple_of(BLOCK_ALIGN as usize)
            .and_then(|padded| offset.checked_add(padded))
            .filter(|&end| end <= MAX_DATA_SIZE)
            .ok_or(NscdError::DataRegionFull {
                first_free: offset,
                requested: len,
            })?;

        self.data.resize(end, 0);
        Ok(offset as u32)
    }

    /// Overwrite bytes in the data region
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<()> {
        let start = offset as usize;
        let size = self.data.len();
        let target = start
            .checked_add(bytes.len())
            .and_then(|end| self.data.get_mut(start..end))
            .ok_or(NscdError::WriteOutOfRange {
                offset,
                len: bytes.len(),
                size,
            })?;

        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Append an entry to the end of a bucket chain
    pub fn push_entry(&mut self, bucket: usize, entry: HashEntry) -> Result<u32> {
        let offset = self.alloc(HashEntry::SIZE)?;
        self.write(offset, &entry.to_bytes())?;

        match self.tails[bucket] {
            Some(tail) => self.write(
                tail + HashEntry::NEXT_OFFSET as u32,
                &offset.to_ne_bytes(),
            )?,
            None => self.heads[bucket] = offset,
        }
        self.tails[bucket] = Some(offset);
        self.chain_lens[bucket] += 1;
        self.nentries += 1;

        Ok(offset)
    }

    /// Write a record and the `first` entry that owns it
    ///
    /// The key is stored inside the record allocation, after the payload.
    pub fn add_record(
        &mut self,
        bucket: usize,
        service: RequestType,
        key: &[u8],
        payload: &[u8],
        notfound: bool,
    ) -> Result<RecordRef> {
        let allocsize = DataHead::SIZE + payload.len() + key.len();
        let packet = self.alloc(allocsize)?;
        let head = DataHead {
            allocsize: allocsize.next_multiple_of(BLOCK_ALIGN as usize) as i32,
            recsize: payload.len() as i32,
            timeout: self.expires,
            notfound: notfound as u8,
            nreloads: 0,
            usable: 1,
        };
        self.write(packet, &head.to_bytes())?;
        self.write(packet + DataHead::SIZE as u32, payload)?;

        let key_offset = packet + (DataHead::SIZE + payload.len()) as u32;
        self.write(key_offset, key)?;

        let entry = self.push_entry(
            bucket,
            HashEntry {
                type_tag: service as u8,
                first: 1,
                len: key.len() as i32,
                key: key_offset,
                owner: 0,
                next: ENDREF,
                packet,
            },
        )?;

        Ok(RecordRef {
            entry,
            packet,
            key: key_offset,
            key_len: key.len() as i32,
            service,
        })
    }

    /// Host lookup keyed by name
    pub fn add_host(
        &mut self,
        bucket: usize,
        service: RequestType,
        name: &str,
        host: &HostLookup,
    ) -> Result<RecordRef> {
        let key = nul_terminated(name);
        self.add_record(bucket, service, &key, &host.encode(), host.found <= 0)
    }

    /// Host lookup keyed by address
    pub fn add_host_by_addr(
        &mut self,
        bucket: usize,
        service: RequestType,
        addr: IpAddr,
        host: &HostLookup,
    ) -> Result<RecordRef> {
        let key = octets(&addr);
        self.add_record(bucket, service, &key, &host.encode(), host.found <= 0)
    }

    /// Address-info lookup keyed by name
    pub fn add_ai(&mut self, bucket: usize, name: &str, ai: &AddrInfo) -> Result<RecordRef> {
        let key = nul_terminated(name);
        self.add_record(bucket, RequestType::GetAi, &key, &ai.encode(), ai.found <= 0)
    }

    /// Add a non-first entry that shares an existing record and key
    pub fn link(&mut self, bucket: usize, target: RecordRef) -> Result<u32> {
        self.push_entry(
            bucket,
            HashEntry {
                type_tag: target.service as u8,
                first: 0,
                len: target.key_len,
                key: target.key,
                owner: 0,
                next: ENDREF,
                packet: target.packet,
            },
        )
    }

    /// Header that [`build`](Self::build) will write
    pub fn header(&self) -> DbHeader {
        let first_free = self.data.len();
        let data_size = self
            .data_size
            .unwrap_or(first_free + DEFAULT_DATA_SLACK)
            .clamp(first_free, i32::MAX as usize);

        let mut header = self.header;
        header.first_free = first_free as i32;
        header.data_size = data_size as i32;
        header.nentries = self.nentries as i32;
        header.maxnentries = self.nentries as i32;
        header.maxnsearched = self.chain_lens.iter().copied().max().unwrap_or(0) as i32;
        header
    }

    /// Serialize the full image: header, bucket table, data region
    pub fn build(&self) -> Vec<u8> {
        let header = self.header();
        let data_offset = self.data_offset();

        let mut image = header.to_bytes();
        for head in &self.heads {
            image.extend_from_slice(&head.to_ne_bytes());
        }
        image.resize(data_offset, 0);
        image.extend_from_slice(&self.data);
        image.resize(data_offset + header.data_size as usize, 0);
        image
    }
}

impl HostLookup {
    /// Negative lookup result as the daemon caches it
    pub fn not_found(error: i32) -> Self {
        HostLookup {
            version: crate::decode::NSCD_VERSION,
            found: 0,
            name_len: 0,
            name: String::new(),
            aliases: Vec::new(),
            addr_type: -1,
            addr_len: -1,
            addresses: Vec::new(),
            error,
        }
    }

    /// Payload bytes: sub-header, name, alias lengths, addresses, aliases
    pub fn encode(&self) -> Vec<u8> {
        let name = if self.found > 0 || !self.name.is_empty() {
            nul_terminated(&self.name)
        } else {
            Vec::new()
        };

        let mut out = Vec::new();
        for field in [
            self.version,
            self.found,
            name.len() as i32,
            self.aliases.len() as i32,
            self.addr_type,
            self.addr_len,
            self.addresses.len() as i32,
            self.error,
        ] {
            out.extend_from_slice(&field.to_ne_bytes());
        }

        out.extend_from_slice(&name);
        for alias in &self.aliases {
            out.extend_from_slice(&(alias.len() as u32 + 1).to_ne_bytes());
        }
        for addr in &self.addresses {
            out.extend_from_slice(&octets(addr));
        }
        for alias in &self.aliases {
            out.extend_from_slice(&nul_terminated(alias));
        }
        out
    }
}

impl AddrInfo {
    /// Payload bytes: sub-header, packed addresses, families, canonical name
    pub fn encode(&self) -> Vec<u8> {
        let addrs: Vec<u8> = self.addresses.iter().flat_map(octets).collect();
        let canon = if self.canon_name.is_empty() {
            Vec::new()
        } else {
            nul_terminated(&self.canon_name)
        };

        let mut out = Vec::new();
        for field in [
            self.version,
            self.found,
            self.addresses.len() as i32,
            addrs.len() as i32,
            canon.len() as i32,
            self.error,
        ] {
            out.extend_from_slice(&field.to_ne_bytes());
        }

        out.extend_from_slice(&addrs);
        for addr in &self.addresses {
            out.push(AddressFamily::of(addr).to_raw() as u8);
        }
        out.extend_from_slice(&canon);
        out
    }
}

fn nul_terminated(s: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(s.len() + 1);
    bytes.extend_from_slice(s.as_bytes());
    bytes.push(0);
    bytes
}

fn octets(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}
