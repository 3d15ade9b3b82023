//! Pool integration tests driven by `MockSink`
//!
//! Run with: cargo test -p rivven-pool --test pool_test

use bytes::Bytes;
use rivven_pool::testing::MockSink;
use rivven_pool::{Pool, PoolConfig, PoolError, PoolPhase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(10), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timeout waiting for {}", what);
}

fn fast(config: PoolConfig) -> PoolConfig {
    config.with_connection_retry(Duration::from_millis(20))
}

#[tokio::test]
async fn test_fixed_pool_delivers_everything() {
    let sink = Arc::new(MockSink::new());
    let pool = Pool::new(fast(PoolConfig::fixed(3)), sink.clone()).unwrap();

    for i in 0..200 {
        pool.enqueue(format!("record-{}", i)).await.unwrap();
    }

    wait_for("all records sent", || sink.records_sent() == 200).await;
    assert_eq!(pool.status().live_workers, 3);

    let report = pool.exit().await;
    assert_eq!(report.lost_records, 0);
    assert_eq!(report.records_sent, 200);

    let mut sent: Vec<Bytes> = sink.sent_records();
    sent.sort();
    sent.dedup();
    assert_eq!(sent.len(), 200);
}

#[tokio::test]
async fn test_records_enqueued_before_connect_wait() {
    let sink = Arc::new(MockSink::new().with_connect_delay(Duration::from_millis(200)));
    let pool = Pool::new(PoolConfig::fixed(1), sink.clone()).unwrap();

    for i in 0..5 {
        pool.enqueue(format!("early-{}", i)).await.unwrap();
    }
    assert_eq!(pool.status().phase, PoolPhase::Reconnecting);
    assert_eq!(pool.status().buffered, 5);

    wait_for("early records sent", || sink.records_sent() == 5).await;
    assert_eq!(pool.exit().await.lost_records, 0);
}

#[tokio::test]
async fn test_autoscaling_stays_within_bounds() {
    let sink = Arc::new(MockSink::new().with_send_delay(Duration::from_millis(30)));
    let config = fast(PoolConfig::autoscaled(1, 3))
        .with_buffer_capacity(20)
        .with_max_batch_records(1)
        .with_evaluation_interval(Duration::from_millis(10))
        .with_cool_down_period(Duration::from_millis(20));
    let pool = Arc::new(Pool::new(config, sink.clone()).unwrap());

    let producer = {
        let pool = pool.clone();
        tokio::spawn(async move {
            for i in 0..150 {
                pool.enqueue(format!("r{}", i)).await.unwrap();
            }
        })
    };

    let peak = Arc::new(AtomicUsize::new(0));
    wait_for("scale up to max", || {
        let live = pool.status().live_workers;
        peak.fetch_max(live, Ordering::SeqCst);
        assert!(live <= 3, "live workers above max: {}", live);
        live == 3
    })
    .await;

    producer.await.unwrap();
    wait_for("all records sent", || sink.records_sent() == 150).await;

    wait_for("scale down to min", || {
        let status = pool.status();
        assert!(status.live_workers >= 1 && status.live_workers <= 3);
        status.live_workers == 1
    })
    .await;

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert_eq!(pool.exit().await.lost_records, 0);
}

#[tokio::test]
async fn test_error_threshold_forces_single_reconnect() {
    // Reconnects take long enough to observe failures piling up meanwhile
    let sink = Arc::new(MockSink::new().with_connect_delay(Duration::from_millis(1000)));
    let config = PoolConfig::fixed(2)
        .with_error_window(Duration::from_secs(10), 10)
        .with_connection_retry(Duration::from_millis(50));
    let pool = Pool::new(config, sink.clone()).unwrap();

    wait_for("workers started", || pool.status().live_workers == 2).await;
    assert_eq!(sink.connect_count(), 1);

    sink.fail_sends(true);
    for i in 0..4 {
        pool.enqueue(format!("r{}", i)).await.unwrap();
    }

    wait_for("reconnect triggered", || pool.status().reconnects == 1).await;
    let failures_at_trigger = sink.send_failures();
    assert!(failures_at_trigger >= 11);
    assert_eq!(pool.status().phase, PoolPhase::Reconnecting);

    // Further failures while the reconnect is in flight add no trigger
    wait_for("more failures", || {
        sink.send_failures() >= failures_at_trigger + 3
    })
    .await;
    assert_eq!(pool.status().reconnects, 1);

    sink.fail_sends(false);
    wait_for("reconnected", || pool.status().phase == PoolPhase::Warm).await;
    wait_for("records delivered", || sink.records_sent() == 4).await;

    assert_eq!(sink.connect_count(), 2);
    assert_eq!(pool.status().reconnects, 1);
    assert_eq!(pool.status().error_count, 0);
    assert_eq!(pool.exit().await.lost_records, 0);
}

#[tokio::test]
async fn test_connect_failures_are_retried() {
    let sink = Arc::new(MockSink::new());
    sink.fail_connects(true);
    let pool = Pool::new(fast(PoolConfig::fixed(2)), sink.clone()).unwrap();

    wait_for("several connect attempts", || sink.connect_count() >= 3).await;
    let status = pool.status();
    assert_eq!(status.phase, PoolPhase::Reconnecting);
    assert!(!status.connection_healthy);
    assert_eq!(status.live_workers, 0);
    assert!(status.last_connection.is_none());

    sink.fail_connects(false);
    wait_for("connected", || pool.status().live_workers == 2).await;
    assert!(pool.status().connection_healthy);

    pool.exit().await;
}

#[tokio::test]
async fn test_exit_reports_buffered_records_as_lost() {
    let sink = Arc::new(MockSink::new());
    sink.fail_connects(true);
    let config = fast(PoolConfig::fixed(2)).with_buffer_capacity(100);
    let pool = Pool::new(config, sink.clone()).unwrap();

    for _ in 0..37 {
        pool.enqueue(Bytes::from_static(b"x")).await.unwrap();
    }

    let report = pool.exit().await;
    assert_eq!(report.lost_records, 37);
    assert_eq!(report.records_sent, 0);

    let status = pool.status();
    assert_eq!(status.phase, PoolPhase::Closed);
    assert_eq!(status.buffered, 0);
}

#[tokio::test]
async fn test_concurrent_exit_and_wait_share_one_report() {
    let sink = Arc::new(MockSink::new());
    sink.fail_connects(true);
    let pool = Arc::new(Pool::new(fast(PoolConfig::fixed(1)), sink).unwrap());

    for _ in 0..5 {
        pool.enqueue("x").await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..2 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.wait().await }));
    }
    for _ in 0..3 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move { pool.exit().await }));
    }

    for handle in handles {
        let report = timeout(Duration::from_secs(5), handle)
            .await
            .expect("exit/wait should resolve")
            .unwrap();
        assert_eq!(report.lost_records, 5);
    }

    // Immediate after completion
    assert_eq!(pool.wait().await.lost_records, 5);
    assert_eq!(pool.exit().await.lost_records, 5);
}

#[tokio::test]
async fn test_operations_after_exit_fail_with_pool_closed() {
    let pool = Pool::new(PoolConfig::fixed(1), Arc::new(MockSink::new())).unwrap();
    pool.exit().await;

    assert!(matches!(pool.enqueue("x").await, Err(PoolError::PoolClosed)));
    assert!(matches!(pool.try_enqueue("x"), Err(PoolError::PoolClosed)));
    assert!(matches!(
        pool.reload(PoolConfig::fixed(2)).await,
        Err(PoolError::PoolClosed)
    ));
    assert!(pool.is_exiting());
}

#[tokio::test]
async fn test_backpressure_blocks_until_drained() {
    let sink = Arc::new(MockSink::new());
    sink.fail_connects(true);
    let config = fast(PoolConfig::fixed(1)).with_buffer_capacity(2);
    let pool = Arc::new(Pool::new(config, sink.clone()).unwrap());

    pool.try_enqueue("a").unwrap();
    pool.try_enqueue("b").unwrap();
    let err = pool.try_enqueue("c").unwrap_err();
    assert!(err.is_backpressure());

    let producer = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.enqueue("c").await })
    };
    sleep(Duration::from_millis(50)).await;
    assert!(!producer.is_finished());

    sink.fail_connects(false);
    timeout(Duration::from_secs(5), producer)
        .await
        .expect("producer should be released")
        .unwrap()
        .unwrap();

    wait_for("all delivered", || sink.records_sent() == 3).await;
    assert_eq!(pool.exit().await.lost_records, 0);
}

#[tokio::test]
async fn test_exit_releases_blocked_producer() {
    let sink = Arc::new(MockSink::new());
    sink.fail_connects(true);
    let config = fast(PoolConfig::fixed(1)).with_buffer_capacity(1);
    let pool = Arc::new(Pool::new(config, sink).unwrap());

    pool.enqueue("a").await.unwrap();
    let producer = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.enqueue("b").await })
    };
    sleep(Duration::from_millis(20)).await;

    let report = pool.exit().await;
    assert_eq!(report.lost_records, 1);

    let result = producer.await.unwrap();
    assert!(matches!(result, Err(PoolError::PoolClosed)));
}

#[tokio::test]
async fn test_reload_resizes_and_switches_mode() {
    let sink = Arc::new(MockSink::new());
    let pool = Pool::new(fast(PoolConfig::fixed(1)), sink.clone()).unwrap();
    wait_for("one worker", || pool.status().live_workers == 1).await;

    pool.reload(fast(PoolConfig::fixed(4))).await.unwrap();
    wait_for("four workers", || pool.status().live_workers == 4).await;

    pool.reload(fast(PoolConfig::fixed(2))).await.unwrap();
    wait_for("two workers", || pool.status().live_workers == 2).await;

    // Autoscaled with an idle buffer settles on min
    let autoscaled = fast(PoolConfig::autoscaled(3, 5))
        .with_evaluation_interval(Duration::from_millis(10))
        .with_cool_down_period(Duration::from_millis(10));
    pool.reload(autoscaled).await.unwrap();
    wait_for("autoscaled min", || pool.status().live_workers == 3).await;
    assert_eq!(pool.status().desired_workers, 3);

    // Every reconcile pass reconnects
    assert!(sink.connect_count() >= 4);

    pool.exit().await;
}

#[tokio::test]
async fn test_reload_rejects_invalid_config() {
    let pool = Pool::new(fast(PoolConfig::fixed(2)), Arc::new(MockSink::new())).unwrap();
    wait_for("two workers", || pool.status().live_workers == 2).await;

    let err = pool
        .reload(PoolConfig::autoscaled(5, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Config(_)));
    assert_eq!(pool.config().workers, Some(2));

    // Capacity is fixed at construction
    pool.reload(fast(PoolConfig::fixed(2)).with_buffer_capacity(8))
        .await
        .unwrap();
    assert_eq!(pool.status().buffer_capacity, 1024);

    pool.exit().await;
}

#[tokio::test]
async fn test_scale_down_requeues_retrying_batch() {
    let sink = Arc::new(MockSink::new());
    let config = fast(PoolConfig::fixed(2)).with_max_batch_records(1);
    let pool = Pool::new(config, sink.clone()).unwrap();
    wait_for("two workers", || pool.status().live_workers == 2).await;

    sink.fail_sends(true);
    pool.enqueue("a").await.unwrap();
    pool.enqueue("b").await.unwrap();

    // Each worker holds one record and keeps retrying it
    wait_for("both records taken", || pool.status().buffered == 0).await;
    wait_for("retries", || sink.send_failures() >= 4).await;

    pool.reload(fast(PoolConfig::fixed(1)).with_max_batch_records(1))
        .await
        .unwrap();
    wait_for("one worker", || pool.status().live_workers == 1).await;

    sink.fail_sends(false);
    wait_for("both delivered", || sink.records_sent() == 2).await;

    let mut sent = sink.sent_records();
    sent.sort();
    assert_eq!(sent, vec![Bytes::from("a"), Bytes::from("b")]);
    assert_eq!(pool.exit().await.lost_records, 0);
}

#[tokio::test]
async fn test_scale_down_overflow_is_reported_at_exit() {
    let sink = Arc::new(MockSink::new());
    let config = fast(PoolConfig::fixed(2))
        .with_max_batch_records(1)
        .with_buffer_capacity(2);
    let pool = Pool::new(config, sink.clone()).unwrap();
    wait_for("two workers", || pool.status().live_workers == 2).await;

    sink.fail_sends(true);
    pool.enqueue("a").await.unwrap();
    pool.enqueue("b").await.unwrap();
    wait_for("both records taken", || pool.status().buffered == 0).await;

    // Fill the buffer so the stopped worker's record has nowhere to go
    pool.enqueue("c").await.unwrap();
    pool.enqueue("d").await.unwrap();

    pool.reload(
        fast(PoolConfig::fixed(1))
            .with_max_batch_records(1)
            .with_buffer_capacity(2),
    )
    .await
    .unwrap();
    wait_for("one worker", || pool.status().live_workers == 1).await;
    assert_eq!(pool.status().buffered, 2);

    let report = pool.exit().await;
    assert_eq!(report.records_sent, 0);
    assert_eq!(report.records_sent + report.lost_records, 4);
}
