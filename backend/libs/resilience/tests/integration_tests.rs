/// Integration tests for resilience library
use resilience::{
    single_flight::SingleFlight,
    timeout::{with_timeout_result, TimeoutConfig, TimeoutError},
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ==================== Single-Flight Tests ====================

#[tokio::test]
async fn test_waiters_joining_late_still_share_the_flight() {
    let flights = Arc::new(SingleFlight::new("refresh"));
    let calls = Arc::new(AtomicU32::new(0));

    let leader = {
        let flights = flights.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            flights
                .run(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>("fresh".to_string())
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(flights.in_flight());

    let follower = flights
        .run(|| async { Ok::<_, String>("should not run".to_string()) })
        .await;

    assert_eq!(follower, Ok("fresh".to_string()));
    assert_eq!(leader.await.unwrap(), Ok("fresh".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!flights.in_flight());
}

#[tokio::test]
async fn test_flight_completes_when_leader_is_cancelled() {
    let flights = Arc::new(SingleFlight::new("refresh"));

    let leader = {
        let flights = flights.clone();
        tokio::spawn(async move {
            flights
                .run(|| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    7u32
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    leader.abort();

    let result = flights.run(|| async { 0u32 }).await;
    assert_eq!(result, 7);
}

// ==================== Timeout Tests ====================

#[tokio::test]
async fn test_single_flight_under_timeout() {
    let flights: SingleFlight<Result<u32, TimeoutError<String>>> = SingleFlight::new("refresh");
    let config = TimeoutConfig {
        duration: Some(Duration::from_millis(20)),
    };

    let result = flights
        .run(move || async move {
            with_timeout_result(&config, async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<u32, String>(1)
            })
            .await
        })
        .await;

    assert!(matches!(result, Err(TimeoutError::Elapsed(_))));
}
