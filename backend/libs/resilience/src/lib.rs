/// Resilience primitives for the box-office request pipeline
///
/// This library provides:
/// - **Single-flight**: Coalesces concurrent identical operations into one in-flight call
///   whose result every waiter shares
/// - **Timeout**: Optional time limit around outbound calls
///
/// # Example: Coalescing Token Refreshes
///
/// ```rust,no_run
/// use resilience::SingleFlight;
///
/// #[tokio::main]
/// async fn main() {
///     let refreshes: SingleFlight<Result<String, String>> = SingleFlight::new("token-refresh");
///
///     // Every concurrent caller gets the same result from one call
///     let token = refreshes
///         .run(|| async { Ok::<_, String>("new-token".to_string()) })
///         .await;
/// }
/// ```

pub mod single_flight;
pub mod timeout;

pub use single_flight::SingleFlight;
pub use timeout::{with_timeout_result, TimeoutConfig, TimeoutError};
