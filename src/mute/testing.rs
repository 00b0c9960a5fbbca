// Scriptable in-memory AudioHost
//
// Keeps a ledger of live taps, devices, and IO procs, with per-operation
// failure injection, so session lifecycle and rollback can be asserted
// without a running audio subsystem.

use std::collections::HashMap;
use std::sync::Mutex;

use super::platform::AudioHost;
use super::types::{
    AudioProcessObject, DeviceHandle, IoProcToken, Pid, Result, TapEngineError, TapHandle,
};

#[derive(Default)]
struct FakeHostState {
    audio_objects: HashMap<Pid, AudioProcessObject>,
    next_id: u32,
    live_taps: Vec<TapHandle>,
    live_devices: Vec<DeviceHandle>,
    live_io_procs: Vec<(DeviceHandle, IoProcToken)>,
    running_devices: Vec<DeviceHandle>,
    /// Process set passed to every create_mute_tap call, in order.
    tap_process_sets: Vec<Vec<AudioProcessObject>>,
    fail_create_tap: Option<i32>,
    fail_create_aggregate: Option<i32>,
    fail_install_io_proc: Option<i32>,
    fail_start_device: Option<i32>,
    fail_teardown: Option<i32>,
}

/// In-memory stand-in for the platform audio subsystem.
pub struct FakeHost {
    state: Mutex<FakeHostState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeHostState {
                next_id: 1000,
                ..Default::default()
            }),
        }
    }

    /// Give `pid` a live audio process object (object id derived from the
    /// pid so assertions can correlate them).
    pub fn map_pid(&self, pid: Pid) {
        let mut state = self.state.lock().unwrap();
        state.audio_objects.insert(pid, AudioProcessObject(pid + 1_000_000));
    }

    /// Drop `pid`'s audio object, as if the process exited.
    pub fn unmap_pid(&self, pid: Pid) {
        self.state.lock().unwrap().audio_objects.remove(&pid);
    }

    pub fn fail_create_tap(&self, status: i32) {
        self.state.lock().unwrap().fail_create_tap = Some(status);
    }

    pub fn fail_create_aggregate(&self, status: i32) {
        self.state.lock().unwrap().fail_create_aggregate = Some(status);
    }

    pub fn fail_install_io_proc(&self, status: i32) {
        self.state.lock().unwrap().fail_install_io_proc = Some(status);
    }

    pub fn fail_start_device(&self, status: i32) {
        self.state.lock().unwrap().fail_start_device = Some(status);
    }

    /// Make every teardown call report `status`. Teardown still releases
    /// the resource, mirroring best-effort platform behavior.
    pub fn fail_teardown(&self, status: i32) {
        self.state.lock().unwrap().fail_teardown = Some(status);
    }

    /// Total live taps + devices + IO procs.
    pub fn live_resource_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.live_taps.len() + state.live_devices.len() + state.live_io_procs.len()
    }

    pub fn running_device_count(&self) -> usize {
        self.state.lock().unwrap().running_devices.len()
    }

    /// The process set of every tap ever created, in creation order.
    pub fn tap_process_sets(&self) -> Vec<Vec<AudioProcessObject>> {
        self.state.lock().unwrap().tap_process_sets.clone()
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHost for FakeHost {
    fn audio_object_for_pid(&self, pid: Pid) -> Option<AudioProcessObject> {
        self.state.lock().unwrap().audio_objects.get(&pid).copied()
    }

    fn create_mute_tap(&self, processes: &[AudioProcessObject]) -> Result<TapHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.fail_create_tap {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareCreateProcessTap",
                status,
            });
        }
        state.next_id += 1;
        let tap = TapHandle(state.next_id);
        state.live_taps.push(tap);
        state.tap_process_sets.push(processes.to_vec());
        Ok(tap)
    }

    fn create_aggregate_device(&self, tap: TapHandle) -> Result<DeviceHandle> {
        let mut state = self.state.lock().unwrap();
        assert!(state.live_taps.contains(&tap), "aggregate built on dead tap");
        if let Some(status) = state.fail_create_aggregate {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareCreateAggregateDevice",
                status,
            });
        }
        state.next_id += 1;
        let device = DeviceHandle(state.next_id);
        state.live_devices.push(device);
        Ok(device)
    }

    fn install_io_proc(&self, device: DeviceHandle) -> Result<IoProcToken> {
        let mut state = self.state.lock().unwrap();
        assert!(state.live_devices.contains(&device), "IO proc on dead device");
        if let Some(status) = state.fail_install_io_proc {
            return Err(TapEngineError::IoResourceUnavailable { status });
        }
        state.next_id += 1;
        let io_proc = IoProcToken(state.next_id as usize);
        state.live_io_procs.push((device, io_proc));
        Ok(io_proc)
    }

    fn start_device(&self, device: DeviceHandle, _io_proc: IoProcToken) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.fail_start_device {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioDeviceStart",
                status,
            });
        }
        state.running_devices.push(device);
        Ok(())
    }

    fn stop_device(&self, device: DeviceHandle, _io_proc: IoProcToken) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.running_devices.retain(|d| *d != device);
        match state.fail_teardown {
            Some(status) => Err(TapEngineError::PlatformCallFailure {
                operation: "AudioDeviceStop",
                status,
            }),
            None => Ok(()),
        }
    }

    fn destroy_io_proc(&self, device: DeviceHandle, io_proc: IoProcToken) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.live_io_procs.retain(|(d, p)| !(*d == device && *p == io_proc));
        match state.fail_teardown {
            Some(status) => Err(TapEngineError::PlatformCallFailure {
                operation: "AudioDeviceDestroyIOProcID",
                status,
            }),
            None => Ok(()),
        }
    }

    fn destroy_aggregate_device(&self, device: DeviceHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.live_devices.retain(|d| *d != device);
        match state.fail_teardown {
            Some(status) => Err(TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareDestroyAggregateDevice",
                status,
            }),
            None => Ok(()),
        }
    }

    fn destroy_process_tap(&self, tap: TapHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.live_taps.retain(|t| *t != tap);
        match state.fail_teardown {
            Some(status) => Err(TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareDestroyProcessTap",
                status,
            }),
            None => Ok(()),
        }
    }
}
