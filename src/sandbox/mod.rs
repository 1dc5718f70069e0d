pub mod backend;
pub mod command;
pub mod events;
pub mod instance;
pub mod provider;

pub use backend::{DockerBackend, SandboxBackend, WorkspaceSpec};
pub use command::{CommandResult, RunOptions, DEFAULT_TIMEOUT_MS};
pub use events::{EventKind, SandboxEvent};
pub use instance::{Sandbox, SandboxError, SandboxRecord, DEFAULT_WORK_DIR};
pub use provider::{generate_sandbox_id, SandboxProvider};
