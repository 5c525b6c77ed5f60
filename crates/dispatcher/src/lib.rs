//! 任务调度核心：容量控制、执行器、集群派发与父任务聚合

pub mod aggregator;
pub mod capacity;
pub mod completion;
pub mod discovery;
pub mod executor;
pub mod master;
pub mod recovery;
pub mod service;
pub mod strategies;

pub use aggregator::Aggregator;
pub use capacity::{CapacityPermit, CapacityTracker};
pub use completion::TaskFinalizer;
pub use discovery::{wait_for_replicas, NodeDiscovery, StaticNodeDiscovery, WorkerNode};
pub use executor::TaskExecutor;
pub use master::MasterExecutor;
pub use recovery::{RecoveryReport, StartupRecovery};
pub use service::{CreateTaskRequest, ResultPage, SyncWaitOptions, TaskService};
pub use strategies::{LeastLoadedStrategy, NodeLoad, NodeSelectionStrategy};
