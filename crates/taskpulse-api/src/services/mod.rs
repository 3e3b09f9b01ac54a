//! Service layer for business logic.

pub mod coordinator;
pub mod event_relay;
pub mod report;
pub mod task_list_cache;

pub use coordinator::TaskCoordinator;
pub use event_relay::RedisEventRelay;
pub use report::ReportAggregator;
pub use task_list_cache::TaskListCache;
