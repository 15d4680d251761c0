//! Content pipeline runtime.
//!
//! Per-stage job queues (PostgreSQL with SKIP LOCKED, or in memory), worker
//! pools, the render lock, the daily scheduler and the readiness sweep.

pub mod fitness;
pub mod pipeline;
pub mod queue;
pub mod render_lock;
pub mod rotation;
pub mod scheduler;
pub mod stages;
pub mod sweep;
pub mod worker;

pub use pipeline::{ContentPipeline, PipelineStatus, StageStatus};
pub use queue::{JobQueue, JobStatus, MemoryJobQueue, PgJobQueue, QueueStats, QueuedJob};
pub use render_lock::{RenderLock, RenderPermit};
pub use scheduler::{DailyScheduler, PlannedSlot, ScheduleOutcome, plan_day};
pub use stages::{OnDemandRequest, OnDemandResult, StageContext, StageHandler, StageOutcome};
pub use worker::Worker;
