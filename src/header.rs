use crate::error::{NscdError, Result};
use crate::reader::ByteReader;
use serde::Serialize;

/// Supported persistent database version
pub const DB_VERSION: i32 = 1;
/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 104;
/// Alignment of the data region start (the bucket table is padded to it)
pub const ALIGN: usize = 16;
/// Alignment of every object inside the data region
pub const BLOCK_ALIGN: u32 = 8;
/// Offset value meaning "no reference"
pub const ENDREF: u32 = u32::MAX;
/// Size of one bucket table slot
pub const REF_SIZE: usize = std::mem::size_of::<u32>();
/// Default upper bound on the mapped image
pub const DEFAULT_MAX_DB_SIZE: u64 = 32 * 1024 * 1024;

/// Persistent database header (offset 0)
///
/// Mirrors the daemon's on-disk header field for field. The layout has no
/// padding holes, so two headers compare equal exactly when their bytes do.
///
/// ```text
///   0  version            i32     48  poshit         u64
///   4  header_size        i32     56  neghit         u64
///   8  gc_cycle           i32     64  posmiss        u64
///  12  certainly_running  i32     72  negmiss        u64
///  16  timestamp          u64     80  rdlockdelayed  u64
///  24  module             i32     88  wrlockdelayed  u64
///  28  data_size          i32     96  addfailed      u64
///  32  first_free         i32    104  bucket table (module x u32)
///  36  nentries           i32
///  40  maxnentries        i32
///  44  maxnsearched       i32
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DbHeader {
    pub version: i32,
    pub header_size: i32,

    /// Even while quiescent, odd while the writer is mid-update
    pub gc_cycle: i32,

    pub nscd_certainly_running: i32,

    /// Seconds since the epoch of the last daemon update
    pub timestamp: u64,

    /// Number of hash buckets
    pub module: i32,

    /// Size of the data region in bytes
    pub data_size: i32,

    /// Offset of the first unallocated byte in the data region
    pub first_free: i32,

    pub nentries: i32,
    pub maxnentries: i32,
    pub maxnsearched: i32,

    pub poshit: u64,
    pub neghit: u64,
    pub posmiss: u64,
    pub negmiss: u64,

    pub rdlockdelayed: u64,
    pub wrlockdelayed: u64,

    pub addfailed: u64,
}

impl DbHeader {
    /// Create an empty header for a table of `module` buckets
    pub fn new(module: i32) -> Self {
        DbHeader {
            version: DB_VERSION,
            header_size: HEADER_SIZE as i32,
            gc_cycle: 0,
            nscd_certainly_running: 0,
            timestamp: 0,
            module,
            data_size: 0,
            first_free: 0,
            nentries: 0,
            maxnentries: 0,
            maxnsearched: 0,
            poshit: 0,
            neghit: 0,
            posmiss: 0,
            negmiss: 0,
            rdlockdelayed: 0,
            wrlockdelayed: 0,
            addfailed: 0,
        }
    }

    /// Parse the header from the start of `bytes`
    ///
    /// Only the length is checked here; judging the values is the
    /// verifier's job.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(NscdError::ShortHeader {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut r = ByteReader::new(&bytes[..HEADER_SIZE]);
        Ok(DbHeader {
            version: r.read_i32("version")?,
            header_size: r.read_i32("header_size")?,
            gc_cycle: r.read_i32("gc_cycle")?,
            nscd_certainly_running: r.read_i32("nscd_certainly_running")?,
            timestamp: r.read_u64("timestamp")?,
            module: r.read_i32("module")?,
            data_size: r.read_i32("data_size")?,
            first_free: r.read_i32("first_free")?,
            nentries: r.read_i32("nentries")?,
            maxnentries: r.read_i32("maxnentries")?,
            maxnsearched: r.read_i32("maxnsearched")?,
            poshit: r.read_u64("poshit")?,
            neghit: r.read_u64("neghit")?,
            posmiss: r.read_u64("posmiss")?,
            negmiss: r.read_u64("negmiss")?,
            rdlockdelayed: r.read_u64("rdlockdelayed")?,
            wrlockdelayed: r.read_u64("wrlockdelayed")?,
            addfailed: r.read_u64("addfailed")?,
        })
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);

        bytes.extend_from_slice(&self.version.to_ne_bytes());
        bytes.extend_from_slice(&self.header_size.to_ne_bytes());
        bytes.extend_from_slice(&self.gc_cycle.to_ne_bytes());
        bytes.extend_from_slice(&self.nscd_certainly_running.to_ne_bytes());
        bytes.extend_from_slice(&self.timestamp.to_ne_bytes());
        bytes.extend_from_slice(&self.module.to_ne_bytes());
        bytes.extend_from_slice(&self.data_size.to_ne_bytes());
        bytes.extend_from_slice(&self.first_free.to_ne_bytes());
        bytes.extend_from_slice(&self.nentries.to_ne_bytes());
        bytes.extend_from_slice(&self.maxnentries.to_ne_bytes());
        bytes.extend_from_slice(&self.maxnsearched.to_ne_bytes());
        for counter in [
            self.poshit,
            self.neghit,
            self.posmiss,
            self.negmiss,
            self.rdlockdelayed,
            self.wrlockdelayed,
            self.addfailed,
        ] {
            bytes.extend_from_slice(&counter.to_ne_bytes());
        }

        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        bytes
    }

    /// Byte offset of the data region from the start of the image
    ///
    /// `None` when `module` is negative or the table size overflows.
    pub fn data_offset(&self) -> Option<u64> {
        let module = u64::try_from(self.module).ok()?;
        let table = module.checked_mul(REF_SIZE as u64)?;
        let padded = table.checked_next_multiple_of(ALIGN as u64)?;
        (HEADER_SIZE as u64).checked_add(padded)
    }

    /// Total image length implied by the header (header, table, data region)
    ///
    /// Used by loaders to cross-check against the file size.
    pub fn required_image_len(&self) -> Option<u64> {
        let data_size = u64::try_from(self.data_size).ok()?;
        self.data_offset()?.checked_add(data_size)
    }

    /// True when the daemon created the file but never filled in the header
    pub fn is_uninitialized(&self) -> bool {
        self.module == 0 && self.data_size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_creation() {
        let header = DbHeader::new(211);
        assert_eq!(header.version, DB_VERSION);
        assert_eq!(header.header_size, HEADER_SIZE as i32);
        assert_eq!(header.module, 211);
        assert_eq!(header.gc_cycle % 2, 0);
    }

    #[test]
    fn test_header_serialization() {
        let mut header = DbHeader::new(4);
        header.data_size = 4096;
        header.first_free = 128;
        header.nentries = 3;
        header.poshit = 17;
        header.addfailed = u64::MAX;

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let parsed = DbHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_field_offsets() {
        let mut header = DbHeader::new(9);
        header.timestamp = 0x0102_0304_0506_0708;
        header.first_free = 64;
        header.addfailed = 5;

        let bytes = header.to_bytes();
        assert_eq!(&bytes[16..24], &0x0102_0304_0506_0708u64.to_ne_bytes());
        assert_eq!(&bytes[24..28], &9i32.to_ne_bytes());
        assert_eq!(&bytes[32..36], &64i32.to_ne_bytes());
        assert_eq!(&bytes[96..104], &5u64.to_ne_bytes());
    }

    #[test]
    fn test_short_header_rejected() {
        let bytes = DbHeader::new(4).to_bytes();
        assert!(matches!(
            DbHeader::from_bytes(&bytes[..HEADER_SIZE - 1]),
            Err(NscdError::ShortHeader {
                expected: HEADER_SIZE,
                actual: 103
            })
        ));
    }

    #[test]
    fn test_parse_does_not_judge_values() {
        let mut header = DbHeader::new(-5);
        header.version = 99;
        header.gc_cycle = 3;

        let parsed = DbHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed.version, 99);
        assert_eq!(parsed.module, -5);
    }

    #[test]
    fn test_data_offset_padding() {
        // 104 + roundup(4 * 4, 16)
        assert_eq!(DbHeader::new(4).data_offset(), Some(120));
        // 104 + roundup(5 * 4, 16)
        assert_eq!(DbHeader::new(5).data_offset(), Some(136));
        assert_eq!(DbHeader::new(-1).data_offset(), None);
    }

    #[test]
    fn test_required_image_len() {
        let mut header = DbHeader::new(4);
        header.data_size = 1000;
        assert_eq!(header.required_image_len(), Some(1120));

        header.data_size = -8;
        assert_eq!(header.required_image_len(), None);
    }

    #[test]
    fn test_uninitialized() {
        let mut header = DbHeader::new(0);
        assert!(header.is_uninitialized());
        header.data_size = 16;
        assert!(!header.is_uninitialized());
    }
}
