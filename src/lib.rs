pub mod log;
pub mod mute;

// Re-export the engine surface for embedding applications
pub use mute::{
    AudioHost, AudioTapEngine, MuteOrchestrator, MuteStatus, OrchestratorConfig,
    ProcessResolver, RunningApp, RunningAppRegistry, TapEngineError,
};

#[cfg(target_os = "macos")]
pub use mute::{is_process_tap_available, CoreAudioHost};
