//! Fixed-size objects living in the data region
//!
//! Both structures are parsed from byte slices whose bounds the verifier has
//! already established; parsing itself only checks length.

use crate::error::DecodeError;
use crate::reader::ByteReader;
use serde::Serialize;
use std::net::IpAddr;

/// Request (dataset) types known to the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum RequestType {
    GetPwByName = 0,
    GetPwByUid = 1,
    GetGrByName = 2,
    GetGrByGid = 3,
    GetHostByName = 4,
    GetHostByNameV6 = 5,
    GetHostByAddr = 6,
    GetHostByAddrV6 = 7,
    Shutdown = 8,
    GetStat = 9,
    Invalidate = 10,
    GetFdPw = 11,
    GetFdGr = 12,
    GetFdHst = 13,
    GetAi = 14,
    InitGroups = 15,
}

impl RequestType {
    /// One past the highest valid tag
    pub const LAST: u8 = 16;

    pub fn from_u8(value: u8) -> Option<Self> {
        use RequestType::*;
        Some(match value {
            0 => GetPwByName,
            1 => GetPwByUid,
            2 => GetGrByName,
            3 => GetGrByGid,
            4 => GetHostByName,
            5 => GetHostByNameV6,
            6 => GetHostByAddr,
            7 => GetHostByAddrV6,
            8 => Shutdown,
            9 => GetStat,
            10 => Invalidate,
            11 => GetFdPw,
            12 => GetFdGr,
            13 => GetFdHst,
            14 => GetAi,
            15 => InitGroups,
            _ => return None,
        })
    }

    /// Service name as the daemon spells it
    pub fn as_str(&self) -> &'static str {
        use RequestType::*;
        match self {
            GetPwByName => "GETPWBYNAME",
            GetPwByUid => "GETPWBYUID",
            GetGrByName => "GETGRBYNAME",
            GetGrByGid => "GETGRBYGID",
            GetHostByName => "GETHOSTBYNAME",
            GetHostByNameV6 => "GETHOSTBYNAMEv6",
            GetHostByAddr => "GETHOSTBYADDR",
            GetHostByAddrV6 => "GETHOSTBYADDRv6",
            Shutdown => "SHUTDOWN",
            GetStat => "GETSTAT",
            Invalidate => "INVALIDATE",
            GetFdPw => "GETFDPW",
            GetFdGr => "GETFDGR",
            GetFdHst => "GETFDHST",
            GetAi => "GETAI",
            InitGroups => "INITGROUPS",
        }
    }

    /// Whether records of this type can live in the hosts database
    pub fn is_stored(&self) -> bool {
        self.is_host() || *self == RequestType::GetAi
    }

    /// Host lookup types (by name or by address, either family)
    pub fn is_host(&self) -> bool {
        matches!(
            self,
            RequestType::GetHostByName
                | RequestType::GetHostByNameV6
                | RequestType::GetHostByAddr
                | RequestType::GetHostByAddrV6
        )
    }

    /// Lookups keyed by a raw address rather than a name
    pub fn is_by_addr(&self) -> bool {
        matches!(
            self,
            RequestType::GetHostByAddr | RequestType::GetHostByAddrV6
        )
    }

    /// Family of addresses in host records of this type
    pub fn host_family(&self) -> AddressFamily {
        match self {
            RequestType::GetHostByNameV6 | RequestType::GetHostByAddrV6 => AddressFamily::Inet6,
            _ => AddressFamily::Inet,
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address families that appear in cached records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressFamily {
    Inet,
    Inet6,
}

impl AddressFamily {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            libc::AF_INET => Some(AddressFamily::Inet),
            libc::AF_INET6 => Some(AddressFamily::Inet6),
            _ => None,
        }
    }

    /// Family matching an address variant
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::Inet,
            IpAddr::V6(_) => AddressFamily::Inet6,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            AddressFamily::Inet => libc::AF_INET,
            AddressFamily::Inet6 => libc::AF_INET6,
        }
    }

    /// Size of one packed address
    pub fn addr_len(self) -> usize {
        match self {
            AddressFamily::Inet => 4,
            AddressFamily::Inet6 => 16,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AddressFamily::Inet => "IPv4",
            AddressFamily::Inet6 => "IPv6",
        }
    }
}

/// One node of a bucket chain (32 bytes)
///
/// `type_tag` and `first` are kept raw so the verifier can report
/// out-of-range values instead of losing them in parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    pub type_tag: u8,
    pub first: u8,
    pub len: i32,
    pub key: u32,
    pub owner: i32,
    pub next: u32,
    pub packet: u32,
}

impl HashEntry {
    pub const SIZE: usize = 32;

    pub const TYPE_OFFSET: usize = 0;
    pub const FIRST_OFFSET: usize = 1;
    pub const LEN_OFFSET: usize = 4;
    pub const KEY_OFFSET: usize = 8;
    pub const OWNER_OFFSET: usize = 12;
    pub const NEXT_OFFSET: usize = 16;
    pub const PACKET_OFFSET: usize = 20;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(bytes);
        let type_tag = r.read_u8("type")?;
        let first = r.read_u8("first")?;
        r.skip(2, "type padding")?;
        let entry = HashEntry {
            type_tag,
            first,
            len: r.read_i32("key length")?,
            key: r.read_u32("key")?,
            owner: r.read_i32("owner")?,
            next: r.read_u32("next")?,
            packet: r.read_u32("packet")?,
        };
        // daemon-private deletion list pointer
        r.skip(8, "dellist")?;
        Ok(entry)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[Self::TYPE_OFFSET] = self.type_tag;
        out[Self::FIRST_OFFSET] = self.first;
        out[4..8].copy_from_slice(&self.len.to_ne_bytes());
        out[8..12].copy_from_slice(&self.key.to_ne_bytes());
        out[12..16].copy_from_slice(&self.owner.to_ne_bytes());
        out[16..20].copy_from_slice(&self.next.to_ne_bytes());
        out[20..24].copy_from_slice(&self.packet.to_ne_bytes());
        out
    }

    /// Parsed type tag, if in range
    pub fn request_type(&self) -> Option<RequestType> {
        RequestType::from_u8(self.type_tag)
    }

    pub fn is_first(&self) -> bool {
        self.first == 1
    }
}

/// Header of an allocated data record (24 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHead {
    /// Bytes allocated for the record, header included
    pub allocsize: i32,
    /// Bytes of payload following the header
    pub recsize: i32,
    /// Expiry time, seconds since the epoch
    pub timeout: u64,
    pub notfound: u8,
    pub nreloads: u8,
    pub usable: u8,
}

impl DataHead {
    pub const SIZE: usize = 24;

    pub const ALLOCSIZE_OFFSET: usize = 0;
    pub const RECSIZE_OFFSET: usize = 4;
    pub const NOTFOUND_OFFSET: usize = 16;
    pub const USABLE_OFFSET: usize = 18;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = ByteReader::new(bytes);
        let head = DataHead {
            allocsize: r.read_i32("allocsize")?,
            recsize: r.read_i32("recsize")?,
            timeout: r.read_u64("timeout")?,
            notfound: r.read_u8("notfound")?,
            nreloads: r.read_u8("nreloads")?,
            usable: r.read_u8("usable")?,
        };
        r.skip(5, "datahead padding")?;
        Ok(head)
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.allocsize.to_ne_bytes());
        out[4..8].copy_from_slice(&self.recsize.to_ne_bytes());
        out[8..16].copy_from_slice(&self.timeout.to_ne_bytes());
        out[Self::NOTFOUND_OFFSET] = self.notfound;
        out[17] = self.nreloads;
        out[Self::USABLE_OFFSET] = self.usable;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_type_from_u8() {
        for tag in 0..RequestType::LAST {
            let ty = RequestType::from_u8(tag).unwrap();
            assert_eq!(ty as u8, tag);
        }
        assert_eq!(RequestType::from_u8(RequestType::LAST), None);
        assert_eq!(RequestType::from_u8(255), None);
    }

    #[test]
    fn test_stored_types() {
        let stored: Vec<_> = (0..RequestType::LAST)
            .filter_map(RequestType::from_u8)
            .filter(RequestType::is_stored)
            .collect();
        assert_eq!(
            stored,
            vec![
                RequestType::GetHostByName,
                RequestType::GetHostByNameV6,
                RequestType::GetHostByAddr,
                RequestType::GetHostByAddrV6,
                RequestType::GetAi,
            ]
        );
    }

    #[test]
    fn test_names() {
        assert_eq!(RequestType::GetHostByNameV6.to_string(), "GETHOSTBYNAMEv6");
        assert_eq!(RequestType::InitGroups.as_str(), "INITGROUPS");
    }

    #[test]
    fn test_address_family() {
        assert_eq!(AddressFamily::from_raw(libc::AF_INET), Some(AddressFamily::Inet));
        assert_eq!(AddressFamily::from_raw(libc::AF_INET6), Some(AddressFamily::Inet6));
        assert_eq!(AddressFamily::from_raw(0), None);
        assert_eq!(AddressFamily::Inet6.addr_len(), 16);
        assert_eq!(RequestType::GetHostByAddrV6.host_family(), AddressFamily::Inet6);
    }

    #[test]
    fn test_hash_entry_layout() {
        let entry = HashEntry {
            type_tag: RequestType::GetAi as u8,
            first: 1,
            len: 6,
            key: 64,
            owner: -1,
            next: 0xFFFF_FFFF,
            packet: 40,
        };

        let bytes = entry.to_bytes();
        assert_eq!(bytes[HashEntry::TYPE_OFFSET], 14);
        assert_eq!(&bytes[HashEntry::NEXT_OFFSET..20], &u32::MAX.to_ne_bytes());
        assert_eq!(HashEntry::from_bytes(&bytes).unwrap(), entry);
        assert!(entry.is_first());
    }

    #[test]
    fn test_hash_entry_short_slice() {
        assert!(HashEntry::from_bytes(&[0u8; 31]).is_err());
    }

    #[test]
    fn test_data_head_layout() {
        let head = DataHead {
            allocsize: 96,
            recsize: 60,
            timeout: 1_700_000_000,
            notfound: 0,
            nreloads: 3,
            usable: 1,
        };

        let bytes = head.to_bytes();
        assert_eq!(bytes[DataHead::USABLE_OFFSET], 1);
        assert_eq!(DataHead::from_bytes(&bytes).unwrap(), head);
    }
}
