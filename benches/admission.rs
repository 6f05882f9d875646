use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;
use transcribe_gate::admission::AdmissionController;
use transcribe_gate::guards::{FixedMemoryProbe, RequestValidator, ResourceGuard};
use transcribe_gate::metrics::MetricsRecorder;
use transcribe_gate::parse_extensions;

fn bench_admission(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let ctl = Arc::new(AdmissionController::new(4, Duration::from_secs(1)));
    ctl.ensure();

    c.bench_function("acquire_release_uncontended", |b| {
        b.iter(|| {
            rt.block_on(async {
                let permit = ctl.acquire().await.unwrap();
                black_box(&permit);
            })
        })
    });

    c.bench_function("acquire_release_contended_8_tasks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut tasks = Vec::with_capacity(8);
                for _ in 0..8 {
                    let ctl = ctl.clone();
                    tasks.push(tokio::spawn(async move {
                        let _permit = ctl.acquire().await.unwrap();
                        tokio::task::yield_now().await;
                    }));
                }
                for task in tasks {
                    task.await.unwrap();
                }
            })
        })
    });
}

fn bench_guards(c: &mut Criterion) {
    let guard = ResourceGuard::new(85.0);
    let probe = FixedMemoryProbe(42.0);
    let validator =
        RequestValidator::new(parse_extensions("mp3,wav,m4a,flac,webm,mp4,avi,mov"), 1024);
    let metrics = MetricsRecorder::new();

    c.bench_function("pre_admission_checks", |b| {
        b.iter(|| {
            black_box(guard.check(&probe).is_ok());
            black_box(validator.check_extension(black_box("Interview.M4A")).is_ok());
            black_box(validator.check_size(black_box(512)).is_ok());
        })
    });

    c.bench_function("metrics_record", |b| {
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            metrics.record(n % 3 != 0, black_box(12.5));
        })
    });
}

criterion_group!(benches, bench_admission, bench_guards);
criterion_main!(benches);
