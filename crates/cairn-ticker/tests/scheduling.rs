//! Behavioural tests for the priority ticker, run on a paused tokio clock.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use cairn_ticker::{JobResult, PriorityTicker, ScheduleOutcome, TickerConfig, TickerError};
use tokio::sync::Notify;
use tokio::time::{Instant, sleep};

fn counting_job(runs: &Arc<AtomicUsize>) -> impl Future<Output = JobResult> + Send + 'static {
    let runs = Arc::clone(runs);
    async move {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn timestamped_job(
    runs: &Arc<AtomicUsize>,
    fired: &Arc<Mutex<Vec<Instant>>>,
) -> impl Future<Output = JobResult> + Send + 'static {
    let runs = Arc::clone(runs);
    let fired = Arc::clone(fired);
    async move {
        runs.fetch_add(1, Ordering::SeqCst);
        fired.lock().expect("fired lock").push(Instant::now());
        Ok(())
    }
}

async fn panicking_job() -> JobResult {
    panic!("job panicked")
}

fn rearming_job(
    ticker: PriorityTicker,
    runs: Arc<AtomicUsize>,
    limit: usize,
) -> Pin<Box<dyn Future<Output = JobResult> + Send>> {
    Box::pin(async move {
        let count = runs.fetch_add(1, Ordering::SeqCst) + 1;
        if count < limit {
            let next = rearming_job(ticker.clone(), Arc::clone(&runs), limit);
            ticker.schedule_deduped(next, "rearm", Duration::from_millis(5))?;
        }
        Ok(())
    })
}

#[tokio::test(start_paused = true)]
async fn zero_delay_job_runs_and_leaves_queue() {
    let ticker = PriorityTicker::spawn(TickerConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));

    assert_eq!(ticker.queued_count(), 0);
    ticker
        .schedule(counting_job(&runs), Duration::ZERO)
        .expect("schedule");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(ticker.queued_count(), 0);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    ticker
        .schedule(counting_job(&runs), Duration::from_millis(100))
        .expect("schedule");
    assert_eq!(ticker.queued_count(), 1);
    sleep(Duration::from_millis(80)).await;
    assert_eq!(ticker.queued_count(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(ticker.queued_count(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(ticker.dispatched_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn later_dedup_request_keeps_earlier_due_time() {
    let ticker = PriorityTicker::spawn(TickerConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let fired = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let first = ticker
        .schedule_deduped(
            timestamped_job(&runs, &fired),
            "De-dupe test",
            Duration::from_millis(100),
        )
        .expect("schedule");
    assert_eq!(first, ScheduleOutcome::Queued);
    assert_eq!(ticker.queued_count(), 1);

    let second = ticker
        .schedule_deduped(
            timestamped_job(&runs, &fired),
            "De-dupe test",
            Duration::from_millis(150),
        )
        .expect("schedule");
    assert_eq!(second, ScheduleOutcome::Merged { rescheduled: false });
    assert_eq!(ticker.queued_count(), 1);

    sleep(Duration::from_millis(110)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(ticker.queued_count(), 0);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let fired = fired.lock().expect("fired lock");
    let elapsed = fired[0] - start;
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn earlier_dedup_request_promotes_pending_entry() {
    let ticker = PriorityTicker::spawn(TickerConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let fired = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    ticker
        .schedule_deduped(
            timestamped_job(&runs, &fired),
            "De-dupe test",
            Duration::from_millis(150),
        )
        .expect("schedule");
    assert_eq!(ticker.queued_count(), 1);
    let outcome = ticker
        .schedule_deduped(
            timestamped_job(&runs, &fired),
            "De-dupe test",
            Duration::from_millis(100),
        )
        .expect("schedule");
    assert_eq!(outcome, ScheduleOutcome::Merged { rescheduled: true });
    assert_eq!(ticker.queued_count(), 1);

    sleep(Duration::from_millis(110)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(ticker.queued_count(), 0);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let fired = fired.lock().expect("fired lock");
    let elapsed = fired[0] - start;
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(150));
}

#[tokio::test(start_paused = true)]
async fn jobs_fire_in_due_time_order() {
    let ticker = PriorityTicker::spawn(TickerConfig::default());
    let order = Arc::new(Mutex::new(Vec::new()));

    for (label, delay) in [("c", 30_u64), ("a", 10), ("b", 20)] {
        let order = Arc::clone(&order);
        ticker
            .schedule(
                async move {
                    order.lock().expect("order lock").push(label);
                    Ok(())
                },
                Duration::from_millis(delay),
            )
            .expect("schedule");
    }
    assert_eq!(ticker.queued_count(), 3);

    sleep(Duration::from_millis(50)).await;
    assert_eq!(*order.lock().expect("order lock"), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn failing_and_panicking_jobs_do_not_stop_dispatch() {
    let ticker = PriorityTicker::spawn(TickerConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));

    ticker
        .schedule(async { Err::<(), _>(anyhow!("job exploded")) }, Duration::ZERO)
        .expect("schedule");
    ticker
        .schedule(panicking_job(), Duration::ZERO)
        .expect("schedule");
    ticker
        .schedule(counting_job(&runs), Duration::from_millis(1))
        .expect("schedule");

    sleep(Duration::from_millis(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    ticker
        .schedule(counting_job(&runs), Duration::ZERO)
        .expect("ticker still accepts work");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn job_can_rearm_itself_from_inside_its_body() {
    let ticker = PriorityTicker::spawn(TickerConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));

    ticker
        .schedule_deduped(
            rearming_job(ticker.clone(), Arc::clone(&runs), 3),
            "rearm",
            Duration::ZERO,
        )
        .expect("schedule");

    sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(ticker.queued_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn queued_count_drops_at_hand_off_not_completion() {
    let ticker = PriorityTicker::spawn(TickerConfig::default());
    let release = Arc::new(Notify::new());
    let finished = Arc::new(AtomicUsize::new(0));

    {
        let release = Arc::clone(&release);
        let finished = Arc::clone(&finished);
        ticker
            .schedule(
                async move {
                    release.notified().await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                Duration::ZERO,
            )
            .expect("schedule");
    }

    sleep(Duration::from_millis(5)).await;
    assert_eq!(ticker.queued_count(), 0);
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    release.notify_one();
    sleep(Duration::from_millis(5)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn worker_pool_bounds_concurrent_bodies() {
    let ticker = PriorityTicker::spawn(TickerConfig { max_workers: 1 });
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        let done = Arc::clone(&done);
        ticker
            .schedule(
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                Duration::ZERO,
            )
            .expect("schedule");
    }

    sleep(Duration::from_millis(100)).await;
    assert_eq!(done.load(Ordering::SeqCst), 3);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drops_pending_jobs_and_rejects_new_ones() {
    let ticker = PriorityTicker::spawn(TickerConfig::default());
    let runs = Arc::new(AtomicUsize::new(0));

    ticker
        .schedule(counting_job(&runs), Duration::from_millis(20))
        .expect("schedule");
    ticker.shutdown();
    assert!(!ticker.is_running());
    assert_eq!(ticker.queued_count(), 0);
    assert_eq!(
        ticker.schedule(counting_job(&runs), Duration::ZERO),
        Err(TickerError::Stopped)
    );

    sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}
