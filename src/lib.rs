//! # Flowrun — a crash-tolerant flow execution engine
//!
//! `flowrun` drives one persisted flow definition (a DAG of typed nodes)
//! plus a per-request execution context to completion exactly once,
//! tolerating process crashes and stalls via checkpoint/replay:
//!
//! - **Flow graph model**: nodes, edges with branch/loop handles, publish-time
//!   reachability validation, a loop containment index built once at load.
//! - **Execution context**: flat run variables, per-node context addressed as
//!   `"{node_id}.{field}"`, and `rewind()`, the only legal way to ready an
//!   archived run for replay.
//! - **Node runners**: one [`NodeRunner`] per node type, resolved through a
//!   registry whose coverage is asserted at startup, never at execution.
//! - **Flow executor**: sequential DAG walk with a durable log upsert and an
//!   archive write-through after every node, before advancing.
//! - **Breakpoint retry scheduler**: finds runs whose log row went stale,
//!   claims a TTL lock, loads the archived snapshot, and replays at most once.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use flowrun::{
//!     BreakpointRetryScheduler, EngineConfig, FlowDefinition, FlowExecutor,
//!     KeyPathEvaluator, MemoryArchiveStore, MemoryLocker, MemoryLogRepository,
//!     NodeRunnerRegistry, RealIdGenerator, RealTimeProvider, RetrySchedulerConfig,
//!     TriggerInput,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let time = Arc::new(RealTimeProvider);
//!     let registry = Arc::new(NodeRunnerRegistry::new(Arc::new(KeyPathEvaluator::new())));
//!     let log_repo = Arc::new(MemoryLogRepository::new(time.clone()));
//!     let archive = Arc::new(MemoryArchiveStore::new(Duration::from_secs(1800), time.clone()));
//!
//!     let executor = Arc::new(FlowExecutor::new(
//!         registry,
//!         log_repo.clone(),
//!         archive.clone(),
//!         time.clone(),
//!         Arc::new(RealIdGenerator),
//!         EngineConfig::default(),
//!     ));
//!
//!     let scheduler = Arc::new(BreakpointRetryScheduler::new(
//!         executor.clone(),
//!         log_repo,
//!         archive,
//!         Arc::new(MemoryLocker::new(time)),
//!         RetrySchedulerConfig::default(),
//!     ));
//!     let _guard = scheduler.spawn();
//!
//!     let definition: FlowDefinition =
//!         serde_json::from_str(&std::fs::read_to_string("flow.json").unwrap()).unwrap();
//!     let input = TriggerInput {
//!         trigger_payload: serde_json::json!({"query": "hi"}),
//!         organization_code: "org-1".into(),
//!         operator: "user-1".into(),
//!         conversation_id: "conv-1".into(),
//!         topic_id: "topic-1".into(),
//!     };
//!     let outcome = executor.start(&definition, input).await.unwrap();
//!     println!("{:?}", outcome.status);
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod nodes;
pub mod runtime;
pub mod scheduler;
pub mod store;

pub use crate::config::EngineConfig;
pub use crate::context::{ExecutionData, ExpressionEvaluator, KeyPathEvaluator, TriggerInput};
pub use crate::error::{FlowError, FlowResult, NodeError, NodeResult};
pub use crate::executor::{FlowExecutor, RunOutcome};
pub use crate::graph::{
    build_graph, validate_graph, FlowDefinition, FlowEdge, FlowGraph, FlowNode, NodePosition,
    SourceHandle,
};
pub use crate::nodes::{NodeRunner, NodeRunnerRegistry, VertexResult};
pub use crate::runtime::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    TimeProvider,
};
pub use crate::scheduler::{BreakpointRetryScheduler, RetrySchedulerConfig};
pub use crate::store::{
    ExecutionArchiveStore, ExecutionSnapshot, FileArchiveStore, FlowExecuteLog,
    FlowExecuteLogRepository, Locker, MemoryArchiveStore, MemoryLocker, MemoryLogRepository, Page,
    RunStatus,
};
