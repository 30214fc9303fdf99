pub mod context;
pub mod engine;
pub mod error;
pub mod extract;
pub mod http;
pub mod job;
pub mod queue;
pub mod result;
pub mod step;
pub mod template;
pub mod testutil;
pub mod throttle;
pub mod traits;
pub mod worker;

pub use context::VariableContext;
pub use engine::{EngineEvent, EngineReporter, NullReporter, ScrapeEngine, TracingReporter};
pub use error::ScrapeError;
pub use extract::{ExtractionRule, RuleKind, Transform};
pub use http::{HttpRequest, HttpResponse, TransportConfig};
pub use job::{JobDescriptor, JobRecord, JobStatus, JobStatusReport};
pub use queue::{JobQueue, MemoryJobQueue};
pub use result::{ScrapingResult, StepError};
pub use step::{ScrapeConfig, ScrapingStep, StepKind};
pub use traits::{Transport, TransportFactory};
pub use worker::{WorkerReporter, WorkerService};
