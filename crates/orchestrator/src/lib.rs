//! Workflow orchestration: the agent state machine, the per-conversation
//! supervisor, the SSE event multiplexer and the build/repair loop.

pub mod agents;
pub mod build;
pub mod publish;
pub mod runtime;
pub mod services;
pub mod stream;
pub mod supervisor;

pub use build::{CommandCompiler, CompilerDriver, CompilerOutput};
pub use publish::{GithubPrClient, PullRequestClient};
pub use runtime::AgentRuntime;
pub use services::Services;
pub use stream::StreamMultiplexer;
pub use supervisor::WorkflowSupervisor;
