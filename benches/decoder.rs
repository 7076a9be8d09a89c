//! Benchmarks for the ATC payload decoder and panel formatting.
//!
//! Isolates the per-advertisement work from async runtime overhead.

use atc_dashboard::app::panel_lines;
use atc_dashboard::registry::UpdateResult;
use atc_dashboard::{ATC_SERVICE_UUID, Advertisement, MacAddress, decode};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::collections::HashMap;
use std::time::Duration;

const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B]);

/// Custom-format payload: 21.50 °C, 45.20 %, 2980 mV, 87 %, sequence 42
fn atc_payload() -> Vec<u8> {
    vec![
        0xA4, 0xC1, 0x38, 0x00, 0x99, 0x5B, // MAC
        0x66, 0x08, // Temperature: 2150
        0xA8, 0x11, // Humidity: 4520
        0xA4, 0x0B, // Battery: 2980 mV
        0x57, // Battery: 87 %
        0x2A, // Sequence: 42
    ]
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let payload = atc_payload();
    let truncated = payload[..10].to_vec();

    group.throughput(Throughput::Elements(1));
    group.bench_function("valid", |b| b.iter(|| decode(black_box(&payload))));
    group.bench_function("too_short", |b| b.iter(|| decode(black_box(&truncated))));
    group.finish();
}

fn bench_service_lookup(c: &mut Criterion) {
    let advertisement = Advertisement {
        address: TEST_MAC,
        service_data: HashMap::from([(ATC_SERVICE_UUID, atc_payload())]),
        rssi: Some(-67),
        local_name: None,
    };

    c.bench_function("service_lookup_and_decode", |b| {
        b.iter(|| black_box(&advertisement).atc_payload().map(decode))
    });
}

fn bench_panel_lines(c: &mut Criterion) {
    let update = UpdateResult {
        reading: decode(&atc_payload()).unwrap(),
        elapsed: Some(Duration::from_secs(61)),
        timestamp: "08:30:00".to_string(),
    };

    c.bench_function("panel_lines", |b| {
        b.iter(|| panel_lines(black_box("Kitchen"), Some(-67), black_box(&update)))
    });
}

criterion_group!(benches, bench_decode, bench_service_lookup, bench_panel_lines);
criterion_main!(benches);
