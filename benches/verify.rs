use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nscd_dump::{decode_all, verify, AddrInfo, DbHeader, HostLookup, ImageBuilder, RequestType};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::{IpAddr, Ipv4Addr};

/// Image with `count` records spread randomly over 211 buckets
fn populated_image(count: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(0x6e73_6364);
    let mut builder = ImageBuilder::new(211);

    for i in 0..count {
        let name = format!("host-{}.example", i);
        let bucket = rng.gen_range(0..211);
        let addrs: Vec<IpAddr> = (0..rng.gen_range(1..4))
            .map(|_| IpAddr::V4(Ipv4Addr::from(rng.gen::<u32>())))
            .collect();

        if rng.gen_bool(0.5) {
            let host = HostLookup::new(name.clone(), vec![format!("h{}", i)], addrs);
            builder.add_host(bucket, RequestType::GetHostByName, &name, &host).unwrap();
        } else {
            builder.add_ai(bucket, &name, &AddrInfo::new(addrs, name.clone())).unwrap();
        }
    }

    builder.build()
}

/// Benchmark the structural pass alone
fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify");

    for count in [100, 1_000, 10_000] {
        let image = populated_image(count);
        let header = DbHeader::from_bytes(&image).unwrap();
        group.throughput(Throughput::Bytes(image.len() as u64));

        group.bench_with_input(BenchmarkId::from_parameter(count), &image, |b, image| {
            b.iter(|| {
                let db = verify(black_box(image), &header).unwrap();
                black_box(db.summary().entries);
            });
        });
    }

    group.finish();
}

/// Benchmark verification followed by decoding every record
fn bench_verify_and_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify_and_decode");

    for count in [100, 1_000, 10_000] {
        let image = populated_image(count);
        let header = DbHeader::from_bytes(&image).unwrap();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::from_parameter(count), &image, |b, image| {
            b.iter(|| {
                let db = verify(black_box(image), &header).unwrap();
                black_box(decode_all(&db));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_verify, bench_verify_and_decode);
criterion_main!(benches);
