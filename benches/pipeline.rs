//! Benchmarks for the advertisement pipeline.
//!
//! Covers the per-advertisement hot path (merge into a device), the
//! delimited-text export of a long history, and the full run loop fed by a
//! fake scanner.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use continuity_listener::app::{Options, ScanFuture, Scanner, run_with_io};
use continuity_listener::{
    AddressKind, Advertisement, AdvertisementData, Backend, Device, DeviceAddress, MacAddress,
    Observation, ObservationResult,
};
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Apple manufacturer data: vendor marker, Nearby Info with `code`, and a
/// Handoff record whose sequence number varies with `seq`.
fn apple_data(code: u8, seq: u16) -> AdvertisementData {
    let [lo, hi] = seq.to_le_bytes();
    let mut manufacturer_data = vec![0x4C, 0x00, 0x10, 0x05, 0x17, code, 0xAA, 0xBB, 0xCC];
    manufacturer_data.extend([0x0C, 0x0E, 0x00, lo, hi]);
    manufacturer_data.extend([0u8; 11]);

    AdvertisementData {
        address: Some(DeviceAddress::new(TEST_MAC, AddressKind::Random)),
        manufacturer_data: Some(manufacturer_data),
        rssi: Some(-60.0),
        ..Default::default()
    }
}

fn at(millis: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
}

fn device_with_history(records: u16) -> Device {
    let mut device =
        Device::from_advertisement(Advertisement::new(apple_data(0x1E, 0)), at(0)).unwrap();
    for seq in 1..records {
        device.add(Advertisement::new(apple_data(0x1E, seq)), at(u64::from(seq)));
    }
    device
}

/// Benchmark adding one advertisement to devices with histories of various sizes
fn bench_device_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("device_add");
    group.throughput(Throughput::Elements(1));

    for history in [1u16, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("merge", history), &history, |b, &size| {
            let mut device = device_with_history(size);
            let repeat = apple_data(0x1E, 0);
            b.iter(|| {
                device.add(Advertisement::new(black_box(repeat.clone())), at(0));
            })
        });

        group.bench_with_input(BenchmarkId::new("append", history), &history, |b, &size| {
            b.iter_batched(
                || device_with_history(size),
                |mut device| {
                    device.add(Advertisement::new(apple_data(0x1E, u16::MAX)), at(0));
                    black_box(device)
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

/// Benchmark exporting a history to delimited text
fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");

    for history in [10u16, 1000] {
        let device = device_with_history(history);
        group.throughput(Throughput::Elements(u64::from(history)));
        group.bench_with_input(BenchmarkId::from_parameter(history), &device, |b, device| {
            b.iter(|| black_box(device.to_delimited_text()))
        });
    }

    group.finish();
}

/// A fake scanner that yields prepared observations, like the one in app.rs tests.
struct FakeScanner {
    results: Vec<ObservationResult>,
}

impl Scanner for FakeScanner {
    fn start_scan(&self, _backend: Backend, _verbose: bool) -> ScanFuture<'_> {
        let results = self.results.clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<ObservationResult>(results.len().max(1));
            tokio::spawn(async move {
                for r in results {
                    let _ = tx.send(r).await;
                }
            });
            Ok(rx)
        })
    }
}

fn default_options() -> Options {
    Options {
        aliases: vec![],
        verbose: false,
        throttle: None,
        duration: None,
        ttl: None,
        dump: false,
        backend: Backend::Bluer,
    }
}

/// Benchmark the full loop: scanner -> registry -> throttle -> format -> write
fn bench_app_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("app_pipeline");
    let rt = Runtime::new().unwrap();

    for (label, throttle) in [("unthrottled", None), ("throttled", Some(Duration::from_secs(3600)))] {
        let results: Vec<ObservationResult> = (0..100u16)
            .map(|seq| {
                Ok(Observation {
                    data: apple_data(0x1E, seq % 10),
                    received_at: at(u64::from(seq)),
                })
            })
            .collect();

        group.throughput(Throughput::Elements(results.len() as u64));
        group.bench_function(label, |b| {
            b.iter(|| {
                let scanner = FakeScanner {
                    results: results.clone(),
                };
                let options = Options {
                    throttle,
                    ..default_options()
                };
                let mut out = Vec::<u8>::with_capacity(16 * 1024);
                let mut err = Vec::<u8>::new();

                rt.block_on(async {
                    run_with_io(options, &scanner, &mut out, &mut err)
                        .await
                        .unwrap();
                });

                black_box(out)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_device_add,
    bench_export,
    bench_app_pipeline
);
criterion_main!(benches);
