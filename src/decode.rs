//! Record decoding
//!
//! Runs only on records reached through a [`VerifiedDatabase`]. Payload reads
//! are bounded by the record's `allocsize`; whether the bytes consumed match
//! the declared `recsize` is checked afterwards and reported, not assumed.

use crate::entry::{AddressFamily, DataHead, RequestType};
use crate::error::DecodeError;
use crate::reader::ByteReader;
use crate::verify::{RecordView, VerifiedDatabase};
use serde::{Serialize, Serializer};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::warn;

/// Interface version the daemon writes into response sub-headers
pub const NSCD_VERSION: i32 = 2;

/// Size of the host lookup sub-header
pub const HST_RESPONSE_SIZE: usize = 32;
/// Size of the address-info sub-header
pub const AI_RESPONSE_SIZE: usize = 24;

/// Result of a host lookup (by name or by address)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostLookup {
    pub version: i32,
    /// Negative when the service was disabled
    pub found: i32,
    /// `h_name_len` as stored, terminating NUL included
    pub name_len: usize,
    pub name: String,
    pub aliases: Vec<String>,
    /// `h_addrtype` as stored; may disagree with the address variants
    pub addr_type: i32,
    pub addr_len: i32,
    pub addresses: Vec<IpAddr>,
    pub error: i32,
}

impl HostLookup {
    /// Positive lookup result; the address family follows the first address
    pub fn new(name: impl Into<String>, aliases: Vec<String>, addresses: Vec<IpAddr>) -> Self {
        let family = addresses
            .first()
            .map_or(AddressFamily::Inet, AddressFamily::of);

        let name = name.into();
        HostLookup {
            version: NSCD_VERSION,
            found: 1,
            name_len: name.len() + 1,
            name,
            aliases,
            addr_type: family.to_raw(),
            addr_len: family.addr_len() as i32,
            addresses,
            error: 0,
        }
    }
}

/// Result of an address-info lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddrInfo {
    pub version: i32,
    pub found: i32,
    /// Packed address bytes declared by `addrslen`
    pub addrs_len: usize,
    /// `canonlen` as stored, zero when there is no canonical name
    pub canon_len: usize,
    pub addresses: Vec<IpAddr>,
    pub canon_name: String,
    pub error: i32,
}

impl AddrInfo {
    pub fn new(addresses: Vec<IpAddr>, canon_name: impl Into<String>) -> Self {
        let canon_name = canon_name.into();
        AddrInfo {
            version: NSCD_VERSION,
            found: 1,
            addrs_len: addresses.iter().map(|a| AddressFamily::of(a).addr_len()).sum(),
            canon_len: if canon_name.is_empty() { 0 } else { canon_name.len() + 1 },
            addresses,
            canon_name,
            error: 0,
        }
    }
}

/// Type-specific part of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Host(HostLookup),
    AddrInfo(AddrInfo),
}

/// Lookup key of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Key {
    Name(String),
    Address(IpAddr),
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Address(addr) => write!(f, "{}", addr),
        }
    }
}

/// Bytes consumed by the decoder disagree with the declared record size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Inconsistency {
    pub index: usize,
    pub recsize: i32,
    pub consumed: usize,
}

impl std::fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Not all of data is processed for record #{}: record size {}, processed {}",
            self.index, self.recsize, self.consumed
        )
    }
}

/// One decoded cache record together with its entry metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedRecord {
    pub index: usize,
    pub service: RequestType,
    pub key: Key,
    pub key_len: i32,
    pub first: bool,
    pub owner: i32,
    pub expires: u64,
    pub usable: bool,
    pub notfound: bool,
    pub nreloads: u8,
    pub allocsize: i32,
    pub recsize: i32,
    pub payload: Payload,
    /// Payload bytes read, sub-header included
    pub consumed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inconsistency: Option<Inconsistency>,
}

/// Outcome of decoding one record in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecodeOutcome {
    Decoded(DecodedRecord),
    Skipped {
        index: usize,
        service: RequestType,
        #[serde(serialize_with = "serialize_display")]
        error: DecodeError,
    },
}

fn serialize_display<S: Serializer>(
    value: &impl std::fmt::Display,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Decode one verified record
pub fn decode(view: &RecordView<'_>) -> Result<DecodedRecord, DecodeError> {
    let verified = view.entry;
    let service = verified.service;
    let head = &verified.head;

    let key = decode_key(service, view.key)?;
    let (payload, consumed) = decode_payload(service, &view.record[DataHead::SIZE..])?;

    let inconsistency = if usize::try_from(head.recsize).ok() != Some(consumed) {
        Some(Inconsistency {
            index: view.index,
            recsize: head.recsize,
            consumed,
        })
    } else {
        None
    };

    Ok(DecodedRecord {
        index: view.index,
        service,
        key,
        key_len: verified.entry.len,
        first: verified.entry.is_first(),
        owner: verified.entry.owner,
        expires: head.timeout,
        usable: head.usable == 1,
        notfound: head.notfound == 1,
        nreloads: head.nreloads,
        allocsize: head.allocsize,
        recsize: head.recsize,
        payload,
        consumed,
        inconsistency,
    })
}

/// Decode every record, skipping those whose payload cannot be read
pub fn decode_all(db: &VerifiedDatabase<'_>) -> Vec<DecodeOutcome> {
    db.records()
        .map(|view| match decode(&view) {
            Ok(record) => {
                if let Some(inconsistency) = &record.inconsistency {
                    warn!(
                        index = inconsistency.index,
                        recsize = inconsistency.recsize,
                        consumed = inconsistency.consumed,
                        "Record size does not match decoded payload"
                    );
                }
                DecodeOutcome::Decoded(record)
            }
            Err(error) => {
                warn!(index = view.index, %error, "Skipping undecodable record");
                DecodeOutcome::Skipped {
                    index: view.index,
                    service: view.entry.service,
                    error,
                }
            }
        })
        .collect()
}

/// Decode a payload (the bytes after the record header)
///
/// Returns the payload and the number of bytes consumed.
pub fn decode_payload(
    service: RequestType,
    payload: &[u8],
) -> Result<(Payload, usize), DecodeError> {
    let mut r = ByteReader::new(payload);
    let payload = if service.is_host() {
        Payload::Host(decode_host(service, &mut r)?)
    } else if service == RequestType::GetAi {
        Payload::AddrInfo(decode_ai(&mut r)?)
    } else {
        return Err(DecodeError::NoPayload(service.as_str()));
    };

    Ok((payload, r.consumed()))
}

fn decode_host(service: RequestType, r: &mut ByteReader<'_>) -> Result<HostLookup, DecodeError> {
    let version = r.read_i32("hst version")?;
    let found = r.read_i32("hst found")?;
    let name_len = r.read_len("h_name_len")?;
    let aliases_cnt = r.read_len("h_aliases_cnt")?;
    let addr_type = r.read_i32("h_addrtype")?;
    let addr_len = r.read_i32("h_length")?;
    let addr_cnt = r.read_len("h_addr_list_cnt")?;
    let error = r.read_i32("hst error")?;

    let name = c_string(r.take(name_len, "host name")?);

    let mut alias_lens = Vec::with_capacity(aliases_cnt.min(r.remaining() / 4));
    for _ in 0..aliases_cnt {
        alias_lens.push(r.read_u32("alias length")? as usize);
    }

    let mut addresses = Vec::with_capacity(addr_cnt.min(r.remaining()));
    if addr_cnt > 0 {
        // Negative-response headers carry h_length = -1 with no addresses
        let family = service.host_family();
        let step = usize::try_from(addr_len).map_err(|_| DecodeError::NegativeLength {
            field: "h_length",
            value: addr_len,
        })?;
        if step != family.addr_len() {
            return Err(DecodeError::AddressLength {
                family: family.label(),
                len: step,
            });
        }
        for _ in 0..addr_cnt {
            addresses.push(ip_from_bytes(family, r.take(step, "host address")?));
        }
    }

    let mut aliases = Vec::with_capacity(alias_lens.len());
    for len in alias_lens {
        aliases.push(c_string(r.take(len, "alias")?));
    }

    Ok(HostLookup {
        version,
        found,
        name_len,
        name,
        aliases,
        addr_type,
        addr_len,
        addresses,
        error,
    })
}

fn decode_ai(r: &mut ByteReader<'_>) -> Result<AddrInfo, DecodeError> {
    let version = r.read_i32("ai version")?;
    let found = r.read_i32("ai found")?;
    let naddrs = r.read_len("naddrs")?;
    let addrslen = r.read_len("addrslen")?;
    let canonlen = r.read_len("canonlen")?;
    let error = r.read_i32("ai error")?;

    let addrs = r.take(addrslen, "addresses")?;
    let families = r.take(naddrs, "address families")?;
    let canon_name = c_string(r.take(canonlen, "canonical name")?);

    let mut packed = ByteReader::new(addrs);
    let mut addresses = Vec::with_capacity(naddrs);
    for &raw in families {
        let family = AddressFamily::from_raw(raw as i32).ok_or(DecodeError::UnknownFamily(raw))?;
        addresses.push(ip_from_bytes(family, packed.take(family.addr_len(), "address")?));
    }
    if packed.remaining() != 0 {
        return Err(DecodeError::AddressBytesMismatch {
            declared: addrslen,
            used: packed.consumed(),
        });
    }

    Ok(AddrInfo {
        version,
        found,
        addrs_len: addrslen,
        canon_len: canonlen,
        addresses,
        canon_name,
        error,
    })
}

fn decode_key(service: RequestType, bytes: &[u8]) -> Result<Key, DecodeError> {
    if !service.is_by_addr() {
        return Ok(Key::Name(c_string(bytes)));
    }

    let family = service.host_family();
    if bytes.len() != family.addr_len() {
        return Err(DecodeError::AddressLength {
            family: family.label(),
            len: bytes.len(),
        });
    }
    Ok(Key::Address(ip_from_bytes(family, bytes)))
}

/// Callers guarantee `bytes.len() == family.addr_len()`
fn ip_from_bytes(family: AddressFamily, bytes: &[u8]) -> IpAddr {
    match family {
        AddressFamily::Inet => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(bytes);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        AddressFamily::Inet6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    }
}

/// Strings are stored with their terminating NUL
fn c_string(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
