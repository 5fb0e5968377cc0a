//! Human-readable and JSON rendering of a verified database

use crate::decode::{decode_all, AddrInfo, DecodeOutcome, DecodedRecord, HostLookup, Payload};
use crate::entry::AddressFamily;
use crate::header::DbHeader;
use crate::verify::{VerifiedDatabase, VerifySummary};
use chrono::DateTime;
use serde::Serialize;
use std::io::{self, Write};
use std::net::IpAddr;

/// Render seconds since the epoch like `asctime(gmtime(..))`
pub fn format_timestamp(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|t| t.format("%a %b %e %H:%M:%S %Y").to_string())
        .unwrap_or_else(|| "Invalid".to_string())
}

fn found_label(found: i32) -> &'static str {
    match found {
        f if f < 0 => "disabled",
        0 => "negative",
        _ => "positive",
    }
}

/// Label for a stored `h_addrtype`, "Unknown" for anything else
fn addr_type_label(addr_type: i32) -> &'static str {
    AddressFamily::from_raw(addr_type).map_or("Unknown", AddressFamily::label)
}

/// Counts of what a dump printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DumpStats {
    pub records: usize,
    pub skipped: usize,
    pub inconsistent: usize,
}

/// Everything a JSON dump contains
#[derive(Debug, Serialize)]
pub struct DumpDocument<'a> {
    pub header: &'a DbHeader,
    pub summary: &'a VerifySummary,
    pub records: Vec<DecodeOutcome>,
}

impl<'a> DumpDocument<'a> {
    pub fn new(db: &'a VerifiedDatabase<'_>) -> Self {
        DumpDocument {
            header: db.header(),
            summary: db.summary(),
            records: decode_all(db),
        }
    }
}

/// Text reporter
///
/// Records go to `out`; consistency warnings and skipped records go to `err`.
pub struct Reporter<W: Write, E: Write> {
    out: W,
    err: E,
    verbose: bool,
}

impl<W: Write, E: Write> Reporter<W, E> {
    pub fn new(out: W, err: E, verbose: bool) -> Self {
        Reporter { out, err, verbose }
    }

    pub fn into_inner(self) -> (W, E) {
        (self.out, self.err)
    }

    /// Header statistics block
    pub fn header_stats(&mut self, head: &DbHeader) -> io::Result<()> {
        let w = &mut self.out;
        writeln!(w, "Database version          : {}", head.version)?;
        writeln!(w, "Database header size      : {}", head.header_size)?;
        writeln!(w, "GC cycles                 : {}", head.gc_cycle)?;
        writeln!(w, "Taken from running daemon : {}", head.nscd_certainly_running)?;
        writeln!(w, "Timestamp, UTC            : {}", format_timestamp(head.timestamp))?;
        writeln!(w, "Modules                   : {}", head.module)?;
        writeln!(w, "Data size                 : {}", head.data_size)?;
        writeln!(w, "First free byte offset    : {}", head.first_free)?;
        writeln!(w, "Number of entries         : {}", head.nentries)?;
        writeln!(w, "Maximum number of entries : {}", head.maxnentries)?;
        writeln!(w, "Maximum entries searched  : {}", head.maxnsearched)?;
        writeln!(w, "Positive hits             : {}", head.poshit)?;
        writeln!(w, "Negative hits             : {}", head.neghit)?;
        writeln!(w, "Positive misses           : {}", head.posmiss)?;
        writeln!(w, "Negative misses           : {}", head.negmiss)?;
        writeln!(w, "Delayed on read lock      : {}", head.rdlockdelayed)?;
        writeln!(w, "Delayed on write lock     : {}", head.wrlockdelayed)?;
        writeln!(w, "Additions failed          : {}", head.addfailed)?;
        writeln!(w)
    }

    /// Header statistics followed by every record
    pub fn dump(&mut self, db: &VerifiedDatabase<'_>) -> io::Result<DumpStats> {
        self.header_stats(db.header())?;

        let mut stats = DumpStats::default();
        for outcome in decode_all(db) {
            match &outcome {
                DecodeOutcome::Decoded(record) => {
                    stats.records += 1;
                    if record.inconsistency.is_some() {
                        stats.inconsistent += 1;
                    }
                }
                DecodeOutcome::Skipped { .. } => stats.skipped += 1,
            }
            self.outcome(&outcome)?;
        }

        Ok(stats)
    }

    pub fn outcome(&mut self, outcome: &DecodeOutcome) -> io::Result<()> {
        match outcome {
            DecodeOutcome::Decoded(record) => self.record(record),
            DecodeOutcome::Skipped {
                index,
                service,
                error,
            } => writeln!(
                self.err,
                "Skipping record #{} ({}): {}",
                index, service, error
            ),
        }
    }

    pub fn record(&mut self, record: &DecodedRecord) -> io::Result<()> {
        let w = &mut self.out;
        writeln!(
            w,
            "#{}. Key: \"{}\". Expires, UTC: {}",
            record.index,
            record.key,
            format_timestamp(record.expires)
        )?;
        writeln!(
            w,
            " Record is {}usable, {} response, reloads in cache w/o change: {}, first: {}",
            if record.usable { "" } else { "un" },
            if record.notfound { "negative" } else { "positive" },
            record.nreloads,
            if record.first { "yes" } else { "no" }
        )?;

        if self.verbose {
            writeln!(
                w,
                " Key len: {}, allocated size: {}, record size: {}, owner: {}",
                record.key_len, record.allocsize, record.recsize, record.owner
            )?;
            write!(w, " Service: {}", record.service)?;
        }

        match &record.payload {
            Payload::Host(host) => self.host(host)?,
            Payload::AddrInfo(ai) => self.addr_info(ai)?,
        }

        if let Some(inconsistency) = &record.inconsistency {
            writeln!(self.err, "{}", inconsistency)?;
        }

        writeln!(self.out)
    }

    fn host(&mut self, host: &HostLookup) -> io::Result<()> {
        let w = &mut self.out;
        if self.verbose {
            writeln!(
                w,
                ", version: {}, {} response",
                host.version,
                found_label(host.found)
            )?;
            writeln!(
                w,
                " Name len: {}, aliases count: {}, address type: {}, length: {}, address list count: {}, error: {}",
                host.name_len,
                host.aliases.len(),
                host.addr_type,
                host.addr_len,
                host.addresses.len(),
                host.error
            )?;
        }

        writeln!(w, "  Name: \"{}\"", host.name)?;
        let label = addr_type_label(host.addr_type);
        write_addresses(w, &host.addresses, |_| label)?;

        write!(w, "  Aliases: ")?;
        if host.aliases.is_empty() {
            write!(w, "none")?;
        }
        for (i, alias) in host.aliases.iter().enumerate() {
            if i > 0 {
                write!(w, ", ")?;
            }
            write!(w, "\"{}\"", alias)?;
        }
        writeln!(w)
    }

    fn addr_info(&mut self, ai: &AddrInfo) -> io::Result<()> {
        let w = &mut self.out;
        if self.verbose {
            writeln!(
                w,
                ", version: {}, {} response",
                ai.version,
                found_label(ai.found)
            )?;
            writeln!(
                w,
                " Number of addresses: {}, address length: {}, canonical name length: {}, error: {}",
                ai.addresses.len(),
                ai.addrs_len,
                ai.canon_len,
                ai.error
            )?;
        }

        write_addresses(w, &ai.addresses, |addr| AddressFamily::of(addr).label())?;
        writeln!(w, "  Canonical name: \"{}\"", ai.canon_name)
    }
}

fn write_addresses(
    w: &mut impl Write,
    addresses: &[IpAddr],
    label: impl Fn(&IpAddr) -> &'static str,
) -> io::Result<()> {
    write!(w, "  Addresses: ")?;
    if addresses.is_empty() {
        write!(w, "none")?;
    }
    for (i, addr) in addresses.iter().enumerate() {
        if i > 0 {
            write!(w, ", ")?;
        }
        write!(w, "({}) {}", label(addr), addr)?;
    }
    writeln!(w)
}

/// Write the whole database as one JSON document
pub fn write_json<W: Write>(out: W, db: &VerifiedDatabase<'_>) -> crate::error::Result<()> {
    serde_json::to_writer_pretty(out, &DumpDocument::new(db))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ImageBuilder;
    use crate::entry::RequestType;
    use crate::verify::verify;
    use std::net::Ipv4Addr;

    fn render(image: &[u8], verbose: bool) -> (String, String, DumpStats) {
        let header = DbHeader::from_bytes(image).unwrap();
        let db = verify(image, &header).unwrap();
        let mut reporter = Reporter::new(Vec::new(), Vec::new(), verbose);
        let stats = reporter.dump(&db).unwrap();
        let (out, err) = reporter.into_inner();
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
            stats,
        )
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "Thu Jan  1 00:00:00 1970");
        assert_eq!(format_timestamp(1_000_000_000), "Sun Sep  9 01:46:40 2001");
        assert_eq!(format_timestamp(u64::MAX), "Invalid");
    }

    #[test]
    fn test_empty_database_report() {
        let image = ImageBuilder::new(4).counters(5, 6, 7, 8).build();
        let (out, err, stats) = render(&image, false);

        assert_eq!(stats, DumpStats::default());
        assert!(out.contains("Modules                   : 4\n"));
        assert!(out.contains("Number of entries         : 0\n"));
        assert!(out.contains("Negative misses           : 8\n"));
        assert!(!out.contains('#'));
        assert!(err.is_empty());
    }

    #[test]
    fn test_host_record_report() {
        let host = HostLookup::new(
            "alice",
            vec!["al".into(), "ally".into()],
            vec![
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            ],
        );
        let mut builder = ImageBuilder::new(2);
        builder.add_host(1, RequestType::GetHostByName, "alice", &host).unwrap();

        let (out, err, stats) = render(&builder.build(), true);
        assert_eq!(stats.records, 1);
        assert!(err.is_empty());
        assert!(out.contains("#1. Key: \"alice\". Expires, UTC: Thu Jan  1 00:00:00 1970\n"));
        assert!(out.contains("first: yes"));
        assert!(out.contains(" Service: GETHOSTBYNAME, version: 2, positive response\n"));
        assert!(out.contains("  Addresses: (IPv4) 10.0.0.1, (IPv4) 10.0.0.2\n"));
        assert!(out.contains("  Aliases: \"al\", \"ally\"\n"));
        assert!(out.contains(&format!(
            " Name len: 6, aliases count: 2, address type: {}, length: 4, address list count: 2, error: 0\n",
            libc::AF_INET
        )));
    }

    #[test]
    fn test_host_address_label_follows_addr_type() {
        let mut host = HostLookup::new("odd", Vec::new(), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        host.addr_type = 99;
        let mut builder = ImageBuilder::new(1);
        builder.add_host(0, RequestType::GetHostByName, "odd", &host).unwrap();

        let (out, _, stats) = render(&builder.build(), false);
        assert_eq!(stats.records, 1);
        assert!(out.contains("  Addresses: (Unknown) 127.0.0.1\n"));

        let mut host = HostLookup::new("six", Vec::new(), vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        host.addr_type = libc::AF_INET6;
        let mut builder = ImageBuilder::new(1);
        builder.add_host(0, RequestType::GetHostByName, "six", &host).unwrap();

        let (out, _, _) = render(&builder.build(), false);
        assert!(out.contains("  Addresses: (IPv6) 127.0.0.1\n"));
    }

    #[test]
    fn test_addrinfo_verbose_lengths() {
        let ai = AddrInfo::new(
            vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
            ],
            "localhost",
        );
        let mut builder = ImageBuilder::new(1);
        builder.add_ai(0, "localhost", &ai).unwrap();

        let (out, _, _) = render(&builder.build(), true);
        assert!(out.contains(
            " Number of addresses: 2, address length: 20, canonical name length: 10, error: 0\n"
        ));
        assert!(out.contains("  Addresses: (IPv4) 127.0.0.1, (IPv6) ::1\n"));
    }

    #[test]
    fn test_inconsistency_reported_on_err() {
        let ai = AddrInfo::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], "localhost");
        let mut builder = ImageBuilder::new(1);
        let rec = builder.add_ai(0, "localhost", &ai).unwrap();
        // claim two more payload bytes than the decoder will find
        let recsize = ai.encode().len() as i32 + 2;
        builder.write(rec.packet + 4, &recsize.to_ne_bytes()).unwrap();

        let (out, err, stats) = render(&builder.build(), false);
        assert_eq!(stats.inconsistent, 1);
        assert!(out.contains("  Canonical name: \"localhost\"\n"));
        assert!(err.contains("Not all of data is processed for record #1"));
    }

    #[test]
    fn test_json_document() {
        let ai = AddrInfo::new(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)], "localhost");
        let mut builder = ImageBuilder::new(1);
        builder.add_ai(0, "localhost", &ai).unwrap();
        let image = builder.build();
        let header = DbHeader::from_bytes(&image).unwrap();
        let db = verify(&image, &header).unwrap();

        let mut out = Vec::new();
        write_json(&mut out, &db).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();

        assert_eq!(value["header"]["nentries"], 1);
        assert_eq!(value["summary"]["entries"], 1);
        assert_eq!(value["records"][0]["status"], "decoded");
        assert_eq!(value["records"][0]["payload"]["kind"], "addr_info");
        assert_eq!(value["records"][0]["payload"]["canon_name"], "localhost");
        assert_eq!(value["records"][0]["key"], "localhost");
    }
}
