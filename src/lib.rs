pub mod assignment;
pub mod pminus1;
pub mod processor;
pub mod progress;
pub mod runtime;
pub mod transport;
pub mod upload;

pub use assignment::{format_line, parse_line, Assignment, AssignmentBuilder, ParseError, WorkQueue, WorkType};
pub use pminus1::{recommend_bounds, Bounds, Recommendation};
pub use processor::{AssignmentState, CompletionRecord, Coordinator, CycleSummary, ResultType};
pub use progress::{estimate, EngineLog, Estimate, ProgressSample, ProgressSource};
pub use runtime::config::{AgentConfig, AgentConfigBuilder, AgentConfigParams, ComputerInfo};
pub use runtime::runner::Runner;
pub use runtime::state::{AgentState, StateStore};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use transport::{PrimeNetCode, Session, SigningMode, TransportError, TransportOptions, V5Client};
pub use upload::{ProofUploader, UploadError};
