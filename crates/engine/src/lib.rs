pub mod bybit;
pub mod orchestrator;
pub mod retry;
pub mod worker;

pub use bybit::BybitClient;
pub use orchestrator::Orchestrator;
pub use retry::{call_with_retry, RetryPolicy};
pub use worker::{TickOutcome, Worker, WorkerState};
