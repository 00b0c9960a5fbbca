// Mute session lifecycle: tap, aggregate device, keepalive IO proc
//
// The engine owns at most one live session. Allocation is all-or-nothing:
// every step pushes onto an undo stack that is unwound in reverse order if
// a later step fails, so a failed start() never leaves a partial session
// behind. Teardown is best-effort and never fails outward.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::platform::AudioHost;
use super::resolver::ProcessResolver;
use super::types::{
    AudioProcessObject, DeviceHandle, IoProcToken, Pid, Result, TapEngineError, TapHandle,
};

/// The live engine state while a session is active.
#[derive(Debug)]
pub struct MuteSession {
    pub tap: TapHandle,
    pub device: DeviceHandle,
    pub io_proc: IoProcToken,
    /// The resolved process set this session was built from.
    pub processes: Vec<AudioProcessObject>,
}

/// One allocation step, recorded so a failed start() can release
/// everything it acquired in reverse order.
enum Allocation {
    Tap(TapHandle),
    AggregateDevice(DeviceHandle),
    IoProc(DeviceHandle, IoProcToken),
}

/// Owns the lifecycle of one mute session.
///
/// `Idle` is represented by `session == None`. The engine is driven
/// strictly from the orchestrator's control thread; nothing here is
/// touched from the realtime IO thread.
pub struct AudioTapEngine {
    host: Arc<dyn AudioHost>,
    resolver: ProcessResolver,
    session: Option<MuteSession>,
}

impl AudioTapEngine {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self {
            resolver: ProcessResolver::new(host.clone()),
            host,
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn current_session(&self) -> Option<&MuteSession> {
        self.session.as_ref()
    }

    /// Build a mute session covering `pids`.
    ///
    /// Resolution happens first: if no pid maps to a live audio process
    /// object, this fails with `NoTargetProcesses` before any OS
    /// allocation is attempted (an already-active session is left as-is;
    /// the caller decides whether to stop it). If a session is active and
    /// the new set resolves, the old session is fully stopped before the
    /// new one is built; membership changes are a rebuild, not a diff.
    pub fn start(&mut self, pids: &[Pid]) -> Result<()> {
        let processes = self.resolver.resolve_all(pids);
        if processes.is_empty() {
            return Err(TapEngineError::NoTargetProcesses);
        }

        if self.session.is_some() {
            debug!("rebuild requested, stopping previous mute session");
            self.stop();
        }

        let session = self.build_session(processes)?;
        info!(
            tap_id = session.tap.0,
            device_id = session.device.0,
            targets = session.processes.len(),
            "mute session active"
        );
        self.session = Some(session);
        Ok(())
    }

    fn build_session(&self, processes: Vec<AudioProcessObject>) -> Result<MuteSession> {
        let mut undo: Vec<Allocation> = Vec::new();

        let tap = match self.host.create_mute_tap(&processes) {
            Ok(tap) => tap,
            Err(e) => {
                self.unwind(undo);
                return Err(e);
            }
        };
        undo.push(Allocation::Tap(tap));

        let device = match self.host.create_aggregate_device(tap) {
            Ok(device) => device,
            Err(e) => {
                self.unwind(undo);
                return Err(e);
            }
        };
        undo.push(Allocation::AggregateDevice(device));

        let io_proc = match self.host.install_io_proc(device) {
            Ok(io_proc) => io_proc,
            Err(e) => {
                self.unwind(undo);
                return Err(e);
            }
        };
        undo.push(Allocation::IoProc(device, io_proc));

        if let Err(e) = self.host.start_device(device, io_proc) {
            self.unwind(undo);
            return Err(e);
        }

        Ok(MuteSession {
            tap,
            device,
            io_proc,
            processes,
        })
    }

    /// Release every recorded allocation in reverse order. Individual
    /// teardown failures are logged and skipped; there is no recovery for
    /// a handle the OS refuses to release.
    fn unwind(&self, undo: Vec<Allocation>) {
        for allocation in undo.into_iter().rev() {
            match allocation {
                Allocation::IoProc(device, io_proc) => {
                    if let Err(e) = self.host.destroy_io_proc(device, io_proc) {
                        warn!(device_id = device.0, error = %e, "rollback: IO proc teardown failed");
                    }
                }
                Allocation::AggregateDevice(device) => {
                    if let Err(e) = self.host.destroy_aggregate_device(device) {
                        warn!(device_id = device.0, error = %e, "rollback: aggregate device teardown failed");
                    }
                }
                Allocation::Tap(tap) => {
                    if let Err(e) = self.host.destroy_process_tap(tap) {
                        warn!(tap_id = tap.0, error = %e, "rollback: tap teardown failed");
                    }
                }
            }
        }
    }

    /// Tear down the active session, if any. Idempotent; never fails
    /// outward. The engine is `Idle` afterward even if individual
    /// teardown steps reported errors.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        if let Err(e) = self.host.stop_device(session.device, session.io_proc) {
            warn!(device_id = session.device.0, error = %e, "device stop failed");
        }
        if let Err(e) = self.host.destroy_io_proc(session.device, session.io_proc) {
            warn!(device_id = session.device.0, error = %e, "IO proc teardown failed");
        }
        if let Err(e) = self.host.destroy_aggregate_device(session.device) {
            warn!(device_id = session.device.0, error = %e, "aggregate device teardown failed");
        }
        if let Err(e) = self.host.destroy_process_tap(session.tap) {
            warn!(tap_id = session.tap.0, error = %e, "tap teardown failed");
        }

        info!(tap_id = session.tap.0, "mute session torn down");
    }
}

impl Drop for AudioTapEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mute::testing::FakeHost;

    fn engine_with(host: &Arc<FakeHost>) -> AudioTapEngine {
        AudioTapEngine::new(host.clone() as Arc<dyn AudioHost>)
    }

    #[test]
    fn start_with_empty_pid_set_fails_without_allocating() {
        let host = Arc::new(FakeHost::new());
        let mut engine = engine_with(&host);

        let err = engine.start(&[]).unwrap_err();
        assert!(matches!(err, TapEngineError::NoTargetProcesses));
        assert_eq!(host.live_resource_count(), 0);
        assert!(!engine.is_active());
    }

    #[test]
    fn start_with_unresolvable_pids_fails_without_allocating() {
        let host = Arc::new(FakeHost::new());
        let mut engine = engine_with(&host);

        // No pids mapped on the host: nothing resolves.
        let err = engine.start(&[101, 102]).unwrap_err();
        assert!(matches!(err, TapEngineError::NoTargetProcesses));
        assert_eq!(host.live_resource_count(), 0);
    }

    #[test]
    fn start_then_stop_releases_everything() {
        let host = Arc::new(FakeHost::new());
        host.map_pid(42);
        let mut engine = engine_with(&host);

        engine.start(&[42]).unwrap();
        assert!(engine.is_active());
        assert_eq!(host.running_device_count(), 1);

        engine.stop();
        assert!(!engine.is_active());
        assert_eq!(host.live_resource_count(), 0);
        assert_eq!(host.running_device_count(), 0);
    }

    #[test]
    fn rebuild_never_leaves_two_sessions() {
        let host = Arc::new(FakeHost::new());
        host.map_pid(1);
        host.map_pid(2);
        let mut engine = engine_with(&host);

        engine.start(&[1]).unwrap();
        engine.start(&[1, 2]).unwrap();

        // Exactly one tap/device/proc alive, built from the second set.
        assert_eq!(host.live_resource_count(), 3);
        assert_eq!(host.running_device_count(), 1);
        let session = engine.current_session().unwrap();
        assert_eq!(session.processes.len(), 2);
        assert_eq!(host.tap_process_sets().len(), 2);
    }

    #[test]
    fn stop_on_idle_engine_is_a_noop() {
        let host = Arc::new(FakeHost::new());
        let mut engine = engine_with(&host);

        engine.stop();
        engine.stop();
        assert_eq!(host.live_resource_count(), 0);
    }

    #[test]
    fn aggregate_failure_rolls_back_the_tap() {
        let host = Arc::new(FakeHost::new());
        host.map_pid(7);
        host.fail_create_aggregate(-50);
        let mut engine = engine_with(&host);

        let err = engine.start(&[7]).unwrap_err();
        assert!(matches!(
            err,
            TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareCreateAggregateDevice",
                ..
            }
        ));
        assert_eq!(host.live_resource_count(), 0, "tap must be rolled back");
        assert!(!engine.is_active());
    }

    #[test]
    fn io_proc_failure_rolls_back_device_and_tap() {
        let host = Arc::new(FakeHost::new());
        host.map_pid(7);
        host.fail_install_io_proc(1852797029);
        let mut engine = engine_with(&host);

        let err = engine.start(&[7]).unwrap_err();
        assert!(matches!(err, TapEngineError::IoResourceUnavailable { .. }));
        assert_eq!(host.live_resource_count(), 0);
    }

    #[test]
    fn device_start_failure_rolls_back_all_three() {
        let host = Arc::new(FakeHost::new());
        host.map_pid(7);
        host.fail_start_device(-50);
        let mut engine = engine_with(&host);

        let err = engine.start(&[7]).unwrap_err();
        assert!(matches!(
            err,
            TapEngineError::PlatformCallFailure {
                operation: "AudioDeviceStart",
                ..
            }
        ));
        assert_eq!(host.live_resource_count(), 0);
    }

    #[test]
    fn teardown_errors_are_swallowed_and_state_still_resets() {
        let host = Arc::new(FakeHost::new());
        host.map_pid(5);
        let mut engine = engine_with(&host);

        engine.start(&[5]).unwrap();
        host.fail_teardown(-50);

        engine.stop();
        assert!(!engine.is_active(), "engine must be idle even after teardown errors");
    }

    #[test]
    fn duplicate_pids_resolve_to_a_single_process_object() {
        let host = Arc::new(FakeHost::new());
        host.map_pid(9);
        let mut engine = engine_with(&host);

        engine.start(&[9, 9, 9]).unwrap();
        assert_eq!(engine.current_session().unwrap().processes.len(), 1);
    }
}
