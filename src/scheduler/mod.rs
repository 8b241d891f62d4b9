//! Bounded execution of agent invocations.
//!
//! - **TaskPool**: global and per-stage concurrency ceilings, timeouts and
//!   outcome counters
//! - **TaskTracker**: per `(task, agent)` status record kept by the pool
//!
//! # Example
//!
//! ```rust,ignore
//! use token_forge::agents::Stage;
//! use token_forge::scheduler::{TaskPool, TaskPoolConfig};
//! use std::time::Duration;
//!
//! let pool = TaskPool::new(
//!     TaskPoolConfig::new(4)
//!         .with_stage_limit(Stage::Extract, 2)
//!         .with_task_timeout(Duration::from_secs(30)),
//! )?;
//! let tokens = pool.submit(agent.as_ref(), &task, &[]).await?;
//! println!("{:?}", pool.get_stats());
//! ```

pub mod task_pool;
pub mod tracker;

pub use task_pool::{PoolError, PoolStats, TaskPool, TaskPoolConfig};
pub use tracker::{TaskStatus, TaskTracker};
