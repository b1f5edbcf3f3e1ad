//! Pooled container sandbox for executing untrusted user functions.
//!
//! See [`pool::ContainerPool`] for the pool contract and [`ipc`] for the
//! file-based handshake used to communicate with the in-container executor.
//! Feature-gated: only compiled with `--features containers`.

pub mod ipc;
pub mod pool;
pub mod runtime;
pub mod worker_pool;

pub use pool::{ContainerPool, FunctionResult, PoolConfig, PoolError, PooledContainer};
pub use runtime::{detect_runtime, ContainerRuntime, ContainerSpec, ExecOutput};
pub use worker_pool::{SharedWorkerPool, WorkerPoolConfig};
