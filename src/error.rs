use thiserror::Error;

/// Kind of object tracked while walking the data region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    HashEntry,
    Data,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::HashEntry => write!(f, "hash entry"),
            ObjectKind::Data => write!(f, "data record"),
        }
    }
}

/// Structural verification failure
///
/// Every variant is fatal for the whole pass: once one of these is
/// returned no offset from the image may be followed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Header read differs from database header")]
    HeaderMismatch,

    #[error("Invalid database version: {0}")]
    InvalidVersion(i32),

    #[error("Header size in database differs from expected: {found} (expected {expected})")]
    HeaderSize { expected: usize, found: i32 },

    #[error("Future timestamp in header: {timestamp} (limit {limit})")]
    FutureTimestamp { timestamp: u64, limit: u64 },

    #[error("Database is currently mutating: odd GC cycle value {0}")]
    Mutating(i32),

    #[error("No data modules in database")]
    NoModules,

    #[error("Excessive number of data modules: {0}")]
    ExcessiveModules(i32),

    #[error("Data size {data_size} does not fit beside {module} data modules")]
    DataSizeTooLarge { data_size: i32, module: i32 },

    #[error("Negative offset of first free byte: {0}")]
    NegativeFirstFree(i32),

    #[error("Offset to first free byte ({first_free}) is larger than data size ({data_size})")]
    FirstFreeBeyondDataSize { first_free: i32, data_size: i32 },

    #[error("Offset of first free byte isn't properly aligned: {0}")]
    FirstFreeMisaligned(i32),

    #[error("Negative number of maximum entries: {0}")]
    NegativeMaxEntries(i32),

    #[error("Negative number of maximum search entries: {0}")]
    NegativeMaxSearched(i32),

    #[error("Image too short: {required} bytes needed to cover allocated data, {actual} mapped")]
    ImageTooShort { required: u64, actual: u64 },

    #[error("{kind} at offset {offset} with length {len} lies outside allocated data ({first_free} bytes)")]
    OutOfBounds {
        kind: ObjectKind,
        offset: u32,
        len: u64,
        first_free: u32,
    },

    #[error("{kind} at offset {offset} isn't properly aligned")]
    Misaligned { kind: ObjectKind, offset: u32 },

    #[error("Hash entry at offset {0} can't be shared")]
    SharedHashEntry(u32),

    #[error("{kind} at offset {offset} overlaps another object at byte {at}")]
    Overlap {
        kind: ObjectKind,
        offset: u32,
        at: u32,
    },

    #[error("{kind} at offset {offset} doesn't match the extent of the object already there")]
    ExtentMismatch { kind: ObjectKind, offset: u32 },

    #[error("Invalid pointer to a {kind} at offset {offset}")]
    InvalidPointer { kind: ObjectKind, offset: u32 },

    #[error("Record type is out of bounds: {0}")]
    TypeOutOfBounds(u8),

    #[error("Invalid record type: {0}")]
    UnsupportedType(&'static str),

    #[error("Invalid \"{field}\" field contents: {value}")]
    InvalidBoolean { field: &'static str, value: u8 },

    #[error("Negative key length: {0}")]
    NegativeKeyLength(i32),

    #[error("Packet offset {packet} beyond first free byte {first_free}")]
    PacketBeyondFirstFree { packet: u32, first_free: u32 },

    #[error("Packet data header at {packet} runs beyond first free byte {first_free}")]
    PacketHeaderBeyondFirstFree { packet: u32, first_free: u32 },

    #[error("Short data header size: allocated {0}")]
    ShortDataHeader(i32),

    #[error("Record size {recsize} is above allocated size {allocsize}")]
    RecordLargerThanAllocation { recsize: i32, allocsize: i32 },

    #[error("Key at {key} (length {len}) lies outside record at {packet} ({allocsize} bytes)")]
    KeyOutsideRecord {
        key: u32,
        len: i32,
        packet: u32,
        allocsize: i32,
    },

    #[error("Circular list detected in bucket {bucket} at entry {offset}")]
    CircularList { bucket: usize, offset: u32 },

    #[error("Actual number of records ({counted}) doesn't match the header ({recorded})")]
    EntryCountMismatch { counted: u64, recorded: i32 },

    #[error("Unreferenced data found at offset {0}")]
    Unreferenced(u32),

    #[error("Database header changed in transit")]
    HeaderChanged,

    #[error("Unreadable {kind} at offset {offset}")]
    Unreadable { kind: ObjectKind, offset: u32 },
}

/// Record-local decode failure
///
/// Never aborts a dump: the record is skipped and the error surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated {field}: need {needed} bytes, {remaining} remain")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Negative {field}: {value}")]
    NegativeLength { field: &'static str, value: i32 },

    #[error("Unexpected address length {len} for {family}")]
    AddressLength { family: &'static str, len: usize },

    #[error("Unknown address family: {0}")]
    UnknownFamily(u8),

    #[error("Address bytes mismatch: declared {declared}, used {used}")]
    AddressBytesMismatch { declared: usize, used: usize },

    #[error("Record type {0} carries no decodable payload")]
    NoPayload(&'static str),
}

#[derive(Error, Debug)]
pub enum NscdError {
    #[error("Short read: header needs {expected} bytes, got {actual}")]
    ShortHeader { expected: usize, actual: usize },

    #[error("Header size does not match: expected {expected}, found {found}")]
    HeaderSizeMismatch { expected: usize, found: i32 },

    #[error("Uninitialized header")]
    UninitializedHeader,

    #[error("File size does not match: need {required} bytes, file has {actual}")]
    FileSizeMismatch { required: u64, actual: u64 },

    #[error("Image of {0} bytes exceeds the configured maximum database size")]
    ImageTooLarge(u64),

    #[error("Data region cannot grow by {requested} bytes past {first_free}")]
    DataRegionFull { first_free: usize, requested: usize },

    #[error("Write of {len} bytes at offset {offset} outside the {size}-byte data region")]
    WriteOutOfRange { offset: u32, len: usize, size: usize },

    #[error("Error validating database: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, NscdError>;
