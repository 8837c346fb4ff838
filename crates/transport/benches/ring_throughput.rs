use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tempfile::tempdir;
use transport::{FrameView, ShmConsumer, ShmProducer};

fn bench_submit_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_roundtrip");

    let resolutions = [
        (640u32, 480u32, "VGA"),
        (1280, 720, "HD"),
        (1920, 1080, "FullHD"),
    ];

    for (width, height, label) in resolutions.iter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bench_ring.shm");

        let mut consumer = ShmConsumer::create(&path).unwrap();
        let mut producer = ShmProducer::connect(&path).unwrap();
        producer.configure(*width, *height, 87).unwrap();

        let pixels = vec![0x5Au8; (*width * *height * 4) as usize];
        let mut frame_number = 0u64;

        group.bench_with_input(BenchmarkId::new("roundtrip", label), label, |b, _| {
            b.iter(|| {
                let frame = FrameView {
                    frame_number,
                    image_index: (frame_number % 3) as u32,
                    width: *width,
                    height: *height,
                    stride: *width * 4,
                    is_idr: false,
                    target_timestamp_ns: 0,
                    semaphore_value: 0,
                    pose: transport::frame::IDENTITY_POSE,
                    pixels: &pixels,
                };
                frame_number += 1;
                producer.submit(black_box(&frame)).unwrap();

                let acquired = consumer
                    .next_ready_slot(Duration::from_millis(100))
                    .unwrap();
                black_box(acquired.pixels);
                let slot = acquired.slot;
                drop(acquired);
                consumer.complete(slot);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submit_consume);
criterion_main!(benches);
