// Platform seam between mute-session logic and the OS audio subsystem.
//
// Everything the engine asks of the platform goes through the AudioHost
// trait, so session lifecycle and rollback can be exercised without a
// running Core Audio HAL.

use crate::mute::types::{AudioProcessObject, DeviceHandle, IoProcToken, Pid, Result, TapHandle};

#[cfg(target_os = "macos")]
pub mod coreaudio;

#[cfg(target_os = "macos")]
pub use coreaudio::CoreAudioHost;

/// Operations the audio subsystem must provide for a mute session.
///
/// Allocation methods are individually fallible; teardown methods report
/// errors but callers treat them as best-effort. None of these may ever
/// run on the realtime IO thread.
#[cfg_attr(test, mockall::automock)]
pub trait AudioHost: Send + Sync {
    /// Translate an OS pid to the subsystem's audio process object.
    ///
    /// `None` means the process has no audio object right now (not playing
    /// audio, not adopted by the subsystem, or already exited) and is not
    /// an error.
    fn audio_object_for_pid(&self, pid: Pid) -> Option<AudioProcessObject>;

    /// Create a private tap that mixes and mutes exactly `processes`,
    /// still delivering the stream so a future unmute stays possible.
    fn create_mute_tap(&self, processes: &[AudioProcessObject]) -> Result<TapHandle>;

    /// Create a private aggregate device with `tap` as its sole
    /// sub-device, set to auto-start the tap.
    fn create_aggregate_device(&self, tap: TapHandle) -> Result<DeviceHandle>;

    /// Register the no-op keepalive IO proc on `device`.
    fn install_io_proc(&self, device: DeviceHandle) -> Result<IoProcToken>;

    fn start_device(&self, device: DeviceHandle, io_proc: IoProcToken) -> Result<()>;

    fn stop_device(&self, device: DeviceHandle, io_proc: IoProcToken) -> Result<()>;

    fn destroy_io_proc(&self, device: DeviceHandle, io_proc: IoProcToken) -> Result<()>;

    fn destroy_aggregate_device(&self, device: DeviceHandle) -> Result<()>;

    fn destroy_process_tap(&self, tap: TapHandle) -> Result<()>;
}
