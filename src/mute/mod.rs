// Selective application mute engine
//
// Builds and tears down composite tap/aggregate-device sessions that
// silence the audio of a chosen set of processes, and keeps those
// sessions synchronized with the user's selection and the set of running
// applications.

pub mod engine;
pub mod orchestrator;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod testing;
pub mod types;

// Re-export commonly used types
pub use engine::{AudioTapEngine, MuteSession};
pub use orchestrator::{MuteOrchestrator, OrchestratorConfig};
pub use platform::AudioHost;
pub use registry::RunningAppRegistry;
pub use resolver::ProcessResolver;
pub use types::{MuteStatus, Pid, Result, RunningApp, TapEngineError};

// Platform-specific re-exports
#[cfg(target_os = "macos")]
pub use platform::coreaudio::is_process_tap_available;
#[cfg(target_os = "macos")]
pub use platform::CoreAudioHost;
