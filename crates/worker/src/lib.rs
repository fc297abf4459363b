pub mod pool;
pub mod registry;
pub mod sampler;

pub use pool::{ElasticPoolController, LocalProvisioner, ScaleDecision, WorkerProvisioner};
pub use registry::{WorkerCounts, WorkerRegistry};
pub use sampler::{ProcFsSampler, ResourceSample, ResourceSampler, StaticSampler};
