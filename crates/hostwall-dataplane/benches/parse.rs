//! Packet Parsing Benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use hostwall_common::PacketRecord;
use hostwall_dataplane::{parse_ethernet_frame, parse_ip_packet, RecordPool};

fn ipv4_tcp() -> [u8; 40] {
    [
        0x45, 0x00, 0x00, 0x28, // ver, ihl, tos, len
        0x00, 0x00, 0x40, 0x00, // id, flags, frag
        0x40, 0x06, 0x00, 0x00, // ttl, proto (TCP), checksum
        0xC0, 0xA8, 0x01, 0x01, // src ip: 192.168.1.1
        0x0A, 0x00, 0x00, 0x01, // dst ip: 10.0.0.1
        0x30, 0x39, 0x01, 0xBB, // src port: 12345, dst port: 443
        0x00, 0x00, 0x00, 0x00, // seq
        0x00, 0x00, 0x00, 0x00, // ack
        0x50, 0x02, 0x00, 0x00, // offset, flags
        0x00, 0x00, 0x00, 0x00, // checksum, urgent
    ]
}

fn bench_parse_ipv4(c: &mut Criterion) {
    let packet = ipv4_tcp();
    let mut rec = PacketRecord::default();

    c.bench_function("parse_ipv4_packet", |b| {
        b.iter(|| {
            let _ = parse_ip_packet(black_box(&packet), &mut rec);
            black_box(&rec);
        })
    });
}

fn bench_parse_ethernet(c: &mut Criterion) {
    let mut frame = vec![0u8; 12];
    frame.extend_from_slice(&[0x08, 0x00]);
    frame.extend_from_slice(&ipv4_tcp());
    let mut rec = PacketRecord::default();

    c.bench_function("parse_ethernet_frame", |b| {
        b.iter(|| {
            let _ = parse_ethernet_frame(black_box(&frame), &mut rec);
            black_box(&rec);
        })
    });
}

fn bench_record_pool(c: &mut Criterion) {
    let pool = RecordPool::new(1024);
    let packet = ipv4_tcp();

    let mut group = c.benchmark_group("record_pool");
    group.throughput(Throughput::Elements(64));
    group.bench_function("64_packets", |b| {
        b.iter(|| {
            for _ in 0..64 {
                let mut rec = pool.acquire();
                let _ = parse_ip_packet(&packet, &mut rec);
                pool.release(black_box(rec));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parse_ipv4, bench_parse_ethernet, bench_record_pool);
criterion_main!(benches);
