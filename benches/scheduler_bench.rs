//! Benchmarks for the weighted round-robin scheduler.
//!
//! Covers:
//! - Retry-policy delay computation
//! - Channel pool get-or-create
//! - Submission throughput (buffered, no dispatch)
//! - End-to-end dispatch through the parallel task processor

use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use taskwheel::backoff::{ExponentialRetryPolicy, RetryPolicy};
use taskwheel::config::{ProcessorConfig, SchedulerConfig};
use taskwheel::core::{
    AppResult, ChannelPool, ParallelTaskProcessor, PriorityTask, Processor, Scheduler,
    SchedulerOptions, TaskRef, WeightedRoundRobinScheduler,
};
use taskwheel::util::SystemTimeSource;

// ============================================================================
// Bench task and processor
// ============================================================================

struct BenchTask {
    priority: i32,
    settled: Arc<AtomicUsize>,
}

#[async_trait]
impl PriorityTask<i32> for BenchTask {
    fn priority(&self) -> i32 {
        self.priority
    }

    async fn execute(&self) -> AppResult<()> {
        Ok(())
    }

    fn ack(&self) {
        self.settled.fetch_add(1, Ordering::Relaxed);
    }

    fn nack(&self) {
        self.settled.fetch_add(1, Ordering::Relaxed);
    }
}

struct AckingProcessor;

impl Processor<i32> for AckingProcessor {
    fn start(&self) {}

    fn stop(&self) {}

    fn submit(&self, task: TaskRef<i32>) -> AppResult<()> {
        task.ack();
        Ok(())
    }
}

fn build_task(priority: i32, settled: &Arc<AtomicUsize>) -> Arc<BenchTask> {
    Arc::new(BenchTask {
        priority,
        settled: Arc::clone(settled),
    })
}

fn build_scheduler(
    queue_size: usize,
    dispatcher_count: usize,
    processor: Arc<dyn Processor<i32>>,
) -> WeightedRoundRobinScheduler<i32> {
    WeightedRoundRobinScheduler::new(
        SchedulerOptions::new(
            SchedulerConfig::new()
                .with_queue_size(queue_size)
                .with_dispatcher_count(dispatcher_count),
            Arc::new(|task: &dyn PriorityTask<i32>| task.priority()),
            Arc::new(|key: &i32| match key {
                0 => 3,
                1 => 2,
                _ => 1,
            }),
        ),
        processor,
        Arc::new(SystemTimeSource),
    )
    .unwrap()
}

// ============================================================================
// Retry policy
// ============================================================================

fn bench_retry_policy_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry_policy_compute");
    let policy = ExponentialRetryPolicy::new(Duration::from_millis(100));

    group.bench_function("exponential_ladder", |b| {
        b.iter(|| {
            for attempts in 0..16usize {
                black_box(policy.compute_next_delay(Duration::from_secs(1), attempts));
            }
        });
    });
    group.finish();
}

// ============================================================================
// Channel pool
// ============================================================================

fn bench_channel_pool_get_or_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_pool_get_or_create");

    for key_count in [4i32, 16, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(key_count),
            &key_count,
            |b, &key_count| {
                let pool = ChannelPool::<i32>::new(128);
                b.iter(|| {
                    for key in 0..key_count {
                        let (channel, _) = pool.get_or_create_channel(key, 1);
                        black_box(channel.weight());
                    }
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Submission throughput
// ============================================================================

fn bench_buffered_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffered_submit");

    for task_count in [100usize, 1_000] {
        group.throughput(Throughput::Elements(task_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(task_count),
            &task_count,
            |b, &task_count| {
                b.iter(|| {
                    let settled = Arc::new(AtomicUsize::new(0));
                    let scheduler =
                        build_scheduler(task_count, 1, Arc::new(AckingProcessor));
                    for i in 0..task_count {
                        scheduler
                            .submit(build_task(i as i32 % 3, &settled))
                            .unwrap();
                    }
                    black_box(scheduler.stats().queued_tasks);
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// End-to-end dispatch
// ============================================================================

fn bench_end_to_end_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("end_to_end_dispatch");
    group.sample_size(10);

    let task_count = 200usize;
    group.throughput(Throughput::Elements(task_count as u64));
    group.bench_function("scheduler_to_processor", |b| {
        b.iter(|| {
            let settled = Arc::new(AtomicUsize::new(0));
            let processor = Arc::new(
                ParallelTaskProcessor::new(
                    ProcessorConfig::new().with_queue_size(64).with_worker_count(2),
                    Arc::new(ExponentialRetryPolicy::new(Duration::from_millis(1))),
                    Arc::new(SystemTimeSource),
                )
                .unwrap(),
            );
            let scheduler = build_scheduler(task_count, 2, processor.clone());

            processor.start();
            scheduler.start();
            for i in 0..task_count {
                scheduler
                    .submit(build_task(i as i32 % 3, &settled))
                    .unwrap();
            }
            while settled.load(Ordering::Relaxed) < task_count {
                std::thread::yield_now();
            }
            scheduler.stop();
            processor.stop();
        });
    });
    group.finish();
}

criterion_group!(
    policy_benches,
    bench_retry_policy_compute,
    bench_channel_pool_get_or_create
);

criterion_group!(
    scheduler_benches,
    bench_buffered_submit,
    bench_end_to_end_dispatch
);

criterion_main!(policy_benches, scheduler_benches);
