pub mod coordinator;
pub mod flush;
pub mod last_round_cache;
pub mod payload;
pub mod publish;
mod refine;
pub mod scheduler;

pub use coordinator::FleetCoordinator;
pub use flush::{spawn_flush_worker, FlushError, FlushSink};
pub use last_round_cache::CacheSink;
pub use payload::{RoundFlush, RoundPayload};
pub use publish::MqttSink;
pub use refine::refine_record;
pub use scheduler::{Scheduler, SchedulerError};
