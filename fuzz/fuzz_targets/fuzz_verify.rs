#![no_main]
use libfuzzer_sys::fuzz_target;
use nscd_dump::{decode_all, open_image, VerifyConfig};

// Raw bytes as a whole image: header, bucket table and data region
fuzz_target!(|data: &[u8]| {
    let config = VerifyConfig {
        now: Some(u32::MAX as u64),
        ..VerifyConfig::default()
    };

    if let Ok(db) = open_image(data, &config) {
        let _ = decode_all(&db);
    }
});
