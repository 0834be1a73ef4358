// ABOUTME: Remote sandbox lifecycle for Kiln runs
// ABOUTME: Provider trait, E2B implementation and the lifecycle manager the workflow drives

pub mod manager;
pub mod providers;

pub use manager::{SandboxError, SandboxManager};
pub use providers::{
    CommandOptions, CommandResult, E2bConfig, E2bProvider, OutputBuffer, ProviderError,
    SandboxHandle, SandboxProvider, StreamType,
};
#[cfg(any(test, feature = "test-utils"))]
pub use providers::{MemoryProvider, ScriptedCommand};
