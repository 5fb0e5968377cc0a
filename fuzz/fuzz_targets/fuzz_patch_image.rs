#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use nscd_dump::{decode_all, verify, DbHeader, HostLookup, ImageBuilder, RequestType, HEADER_SIZE};
use std::net::{IpAddr, Ipv4Addr};

#[derive(Arbitrary, Debug)]
struct Patch {
    offset: u16,
    value: u32,
}

#[derive(Arbitrary, Debug)]
struct Input {
    names: Vec<String>,
    patches: Vec<Patch>,
}

// Start from a valid image so the walk gets past the header checks
fuzz_target!(|input: Input| {
    let mut builder = ImageBuilder::new(7);
    for (i, name) in input.names.iter().take(32).enumerate() {
        let host = HostLookup::new(
            name.clone(),
            vec![name.clone()],
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, i as u8))],
        );
        if builder
            .add_host(i % 7, RequestType::GetHostByName, name, &host)
            .is_err()
        {
            return;
        }
    }
    let mut image = builder.build();

    let body = image.len() - HEADER_SIZE;
    for patch in &input.patches {
        let at = HEADER_SIZE + (patch.offset as usize % body);
        let end = (at + 4).min(image.len());
        image[at..end].copy_from_slice(&patch.value.to_ne_bytes()[..end - at]);
    }

    let header = match DbHeader::from_bytes(&image) {
        Ok(header) => header,
        Err(_) => return,
    };
    if let Ok(db) = verify(&image, &header) {
        let _ = decode_all(&db);
    }
});
