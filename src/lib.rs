//! # nscd-dump - Persistent nscd Database Verifier
//!
//! Reads the shared-memory cache files the name service cache daemon keeps
//! under `/var/db/nscd`, checks their structure without trusting any offset
//! or length stored in them, and decodes the cached host and address-info
//! lookups.
//!
//! - **Verification first**: records are only reachable through a
//!   [`VerifiedDatabase`], which exists only for images that passed every
//!   check
//! - **Bounded decoding**: payload reads never leave the record's allocation
//! - **Read-only**: files are mapped with `memmap2` and never written
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nscd_dump::{Config, DatabaseFile, Reporter, Result};
//!
//! # fn main() -> Result<()> {
//! let config = Config::default();
//! let file = DatabaseFile::open("/var/db/nscd/hosts", config.dump.max_db_size)?;
//! let db = file.verify(&config.verify)?;
//!
//! let mut reporter = Reporter::new(std::io::stdout(), std::io::stderr(), false);
//! reporter.dump(&db)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## In-memory images
//!
//! ```rust
//! use nscd_dump::{decode_all, verify, DbHeader, ImageBuilder};
//!
//! let image = ImageBuilder::new(4).build();
//! let header = DbHeader::from_bytes(&image).unwrap();
//! let db = verify(&image, &header).unwrap();
//! assert!(decode_all(&db).is_empty());
//! ```

pub mod builder;
pub mod config;
pub mod decode;
pub mod entry;
pub mod error;
pub mod header;
pub mod io;
pub mod reader;
pub mod report;
pub mod usemap;
pub mod verify;

pub use builder::{ImageBuilder, RecordRef};
pub use config::{Config, DumpConfig, OutputFormat, VerifyConfig};
pub use decode::{
    decode, decode_all, decode_payload, AddrInfo, DecodeOutcome, DecodedRecord, HostLookup,
    Inconsistency, Key, Payload,
};
pub use entry::{AddressFamily, DataHead, HashEntry, RequestType};
pub use error::{DecodeError, IntegrityError, NscdError, ObjectKind, Result};
pub use header::{DbHeader, DB_VERSION, HEADER_SIZE};
pub use io::DatabaseFile;
pub use report::{format_timestamp, write_json, DumpDocument, DumpStats, Reporter};
pub use verify::{open_image, verify, RecordView, VerifiedDatabase, VerifiedEntry, Verifier, VerifySummary};
