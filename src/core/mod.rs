//! 核心编排层：错误分类、请求状态机、取消监管、流式事件、编排器与构建

pub mod builder;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod request;
pub mod state;
pub mod supervisor;

pub use builder::{create_llm_from_config, create_orchestrator, OrchestratorBuilder};
pub use error::{CancelReason, ConciergeError, FailureKind};
pub use events::{Fragment, StreamEvent};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RequestHandle, RequestOutcome};
pub use request::{new_request_id, Request};
pub use state::{RequestLifecycle, RequestPhase};
pub use supervisor::{RequestGuard, RequestSupervisor};
