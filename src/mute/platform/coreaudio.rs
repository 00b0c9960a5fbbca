// Core Audio implementation of the AudioHost seam (macOS 14.4+)
//
// Process taps cannot be read or started on their own: the HAL requires
// wrapping the tap in an aggregate device and keeping that device's IO
// cycle alive with an IO proc. The proc body here is deliberately a no-op;
// the tap itself performs the muting.

#![allow(non_upper_case_globals)]

use std::os::raw::c_void;
use std::process;
use std::ptr;

use core_foundation::array::CFArray;
use core_foundation::base::{CFTypeRef, TCFType};
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use coreaudio_sys::{
    kAudioObjectSystemObject, AudioDeviceCreateIOProcID, AudioDeviceDestroyIOProcID,
    AudioDeviceIOProcID, AudioDeviceStart, AudioDeviceStop, AudioHardwareCreateAggregateDevice,
    AudioHardwareDestroyAggregateDevice, AudioObjectGetPropertyData, AudioObjectID,
    AudioObjectPropertyAddress, OSStatus, UInt32,
};
use objc2::AnyThread;
use objc2_core_audio::{
    AudioHardwareCreateProcessTap, AudioHardwareDestroyProcessTap, CATapDescription,
    CATapMuteBehavior,
};
use objc2_foundation::{NSArray, NSNumber};
use tracing::{debug, info, warn};

use super::AudioHost;
use crate::mute::types::{
    AudioProcessObject, DeviceHandle, IoProcToken, Pid, Result, TapEngineError, TapHandle,
};

pub const kAudioHardwarePropertyTranslatePIDToProcessObject: u32 = 1886352239; // 'pidx'
const kAudioTapPropertyUID: u32 = 0x74756964; // 'tuid'

/// Realtime IO proc registered on the aggregate device.
///
/// Runs on an OS-managed realtime thread. It must stay a no-op and must
/// never touch engine or orchestrator state; its only purpose is to keep
/// the aggregate device's IO cycle alive so the tap keeps muting.
unsafe extern "C" fn keepalive_io_proc(
    _device_id: AudioObjectID,
    _now: *const coreaudio_sys::AudioTimeStamp,
    _input_data: *const coreaudio_sys::AudioBufferList,
    _input_time: *const coreaudio_sys::AudioTimeStamp,
    _output_data: *mut coreaudio_sys::AudioBufferList,
    _output_time: *const coreaudio_sys::AudioTimeStamp,
    _client_data: *mut c_void,
) -> OSStatus {
    0
}

fn io_proc_from_token(token: IoProcToken) -> AudioDeviceIOProcID {
    // IoProcToken round-trips AudioDeviceIOProcID (an Option<fn>, which is
    // pointer-sized with a null niche) through a plain usize.
    unsafe { std::mem::transmute::<usize, AudioDeviceIOProcID>(token.0) }
}

/// Talks to the Core Audio HAL. Stateless apart from a per-process
/// counter used to uniquify aggregate device UIDs.
pub struct CoreAudioHost {
    device_uid_prefix: String,
}

impl CoreAudioHost {
    pub fn new() -> Self {
        if !is_process_tap_available() {
            warn!("process tap API unavailable; every mute session will fail visibly");
        }
        Self {
            device_uid_prefix: format!("com.muzzle.mute.{}", process::id()),
        }
    }

    /// Read the UID string the HAL assigned to a tap. The aggregate device
    /// description references sub-taps by this UID, not by object id.
    fn tap_uid(&self, tap: TapHandle) -> Result<String> {
        let address = AudioObjectPropertyAddress {
            mSelector: kAudioTapPropertyUID,
            mScope: 0,   // kAudioObjectPropertyScopeGlobal
            mElement: 0, // kAudioObjectPropertyElementMain
        };

        let mut cf_string_ref: CFTypeRef = ptr::null();
        let mut data_size = std::mem::size_of::<CFTypeRef>() as UInt32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                tap.0,
                &address,
                0,
                ptr::null(),
                &mut data_size,
                &mut cf_string_ref as *mut CFTypeRef as *mut c_void,
            )
        };

        if status != 0 || cf_string_ref.is_null() {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "kAudioTapPropertyUID lookup",
                status,
            });
        }

        let cf_string = unsafe { CFString::wrap_under_create_rule(cf_string_ref as *const _) };
        Ok(cf_string.to_string())
    }
}

impl Default for CoreAudioHost {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioHost for CoreAudioHost {
    fn audio_object_for_pid(&self, pid: Pid) -> Option<AudioProcessObject> {
        let address = AudioObjectPropertyAddress {
            mSelector: kAudioHardwarePropertyTranslatePIDToProcessObject,
            mScope: 0,   // kAudioObjectPropertyScopeGlobal
            mElement: 0, // kAudioObjectPropertyElementMain
        };

        let mut object_id: AudioObjectID = 0;
        let mut data_size = std::mem::size_of::<AudioObjectID>() as UInt32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                kAudioObjectSystemObject,
                &address,
                std::mem::size_of::<Pid>() as UInt32,
                &pid as *const Pid as *const c_void,
                &mut data_size,
                &mut object_id as *mut AudioObjectID as *mut c_void,
            )
        };

        if status != 0 || object_id == 0 {
            debug!(pid, status, "pid has no audio process object");
            return None;
        }

        Some(AudioProcessObject(object_id))
    }

    fn create_mute_tap(&self, processes: &[AudioProcessObject]) -> Result<TapHandle> {
        let mut tap_id: AudioObjectID = 0;

        let status = unsafe {
            let numbers: Vec<_> = processes
                .iter()
                .map(|object| NSNumber::new_u32(object.0))
                .collect();
            let refs: Vec<&NSNumber> = numbers.iter().map(|n| &**n).collect();
            let process_array = NSArray::from_slice(&refs);

            let description = CATapDescription::initStereoMixdownOfProcesses(
                CATapDescription::alloc(),
                &process_array,
            );
            // Private: not discoverable by other processes. Muted: silence
            // the processes while still delivering their stream, so a later
            // unmute needs no rebuild of the processes' own output paths.
            description.setPrivate(true);
            description.setMuteBehavior(CATapMuteBehavior::Muted);

            AudioHardwareCreateProcessTap(Some(&*description), &mut tap_id)
        };

        if status != 0 || tap_id == 0 {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareCreateProcessTap",
                status,
            });
        }

        info!(tap_id, targets = processes.len(), "created mute tap");
        Ok(TapHandle(tap_id))
    }

    fn create_aggregate_device(&self, tap: TapHandle) -> Result<DeviceHandle> {
        let tap_uid = self.tap_uid(tap)?;
        debug!(tap_id = tap.0, %tap_uid, "building aggregate device description");

        let device_uid = format!("{}.{}", self.device_uid_prefix, tap.0);
        let device_name = format!("Muzzle Mute {}", tap.0);

        // kAudioAggregateDevice{Name,UID,IsPrivate,TapAutoStart,TapList}Key
        let name_key = CFString::new("name");
        let uid_key = CFString::new("uid");
        let private_key = CFString::new("private");
        let tap_auto_start_key = CFString::new("tapautostart");
        let tap_list_key = CFString::new("taps");

        let tap_uid_cf = CFString::new(&tap_uid);
        let tap_list = CFArray::<CFString>::from_CFTypes(&[tap_uid_cf]);

        let pairs = [
            (name_key.as_CFType(), CFString::new(&device_name).as_CFType()),
            (uid_key.as_CFType(), CFString::new(&device_uid).as_CFType()),
            (private_key.as_CFType(), CFNumber::from(1i32).as_CFType()),
            (
                tap_auto_start_key.as_CFType(),
                CFNumber::from(1i32).as_CFType(),
            ),
            (tap_list_key.as_CFType(), tap_list.as_CFType()),
        ];
        let description = CFDictionary::from_CFType_pairs(&pairs);

        let mut device_id: AudioObjectID = 0;
        let status = unsafe {
            AudioHardwareCreateAggregateDevice(
                description.as_concrete_TypeRef() as *const c_void as coreaudio_sys::CFDictionaryRef,
                &mut device_id,
            )
        };

        if status != 0 || device_id == 0 {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareCreateAggregateDevice",
                status,
            });
        }

        info!(device_id, tap_id = tap.0, "created aggregate device around tap");
        Ok(DeviceHandle(device_id))
    }

    fn install_io_proc(&self, device: DeviceHandle) -> Result<IoProcToken> {
        let mut io_proc_id: AudioDeviceIOProcID = None;
        let status = unsafe {
            AudioDeviceCreateIOProcID(
                device.0,
                Some(keepalive_io_proc),
                ptr::null_mut(),
                &mut io_proc_id,
            )
        };

        if status != 0 {
            return Err(TapEngineError::IoResourceUnavailable { status });
        }
        let Some(io_proc) = io_proc_id else {
            return Err(TapEngineError::IoResourceUnavailable { status: -50 });
        };

        debug!(device_id = device.0, "installed keepalive IO proc");
        Ok(IoProcToken(io_proc as usize))
    }

    fn start_device(&self, device: DeviceHandle, io_proc: IoProcToken) -> Result<()> {
        let status = unsafe { AudioDeviceStart(device.0, io_proc_from_token(io_proc)) };
        if status != 0 {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioDeviceStart",
                status,
            });
        }
        info!(device_id = device.0, "aggregate device running");
        Ok(())
    }

    fn stop_device(&self, device: DeviceHandle, io_proc: IoProcToken) -> Result<()> {
        let status = unsafe { AudioDeviceStop(device.0, io_proc_from_token(io_proc)) };
        if status != 0 {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioDeviceStop",
                status,
            });
        }
        Ok(())
    }

    fn destroy_io_proc(&self, device: DeviceHandle, io_proc: IoProcToken) -> Result<()> {
        let status =
            unsafe { AudioDeviceDestroyIOProcID(device.0, io_proc_from_token(io_proc)) };
        if status != 0 {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioDeviceDestroyIOProcID",
                status,
            });
        }
        Ok(())
    }

    fn destroy_aggregate_device(&self, device: DeviceHandle) -> Result<()> {
        let status = unsafe { AudioHardwareDestroyAggregateDevice(device.0) };
        if status != 0 {
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareDestroyAggregateDevice",
                status,
            });
        }
        Ok(())
    }

    fn destroy_process_tap(&self, tap: TapHandle) -> Result<()> {
        let status = unsafe { AudioHardwareDestroyProcessTap(tap.0) };
        if status != 0 {
            warn!(tap_id = tap.0, status, "tap teardown reported an error");
            return Err(TapEngineError::PlatformCallFailure {
                operation: "AudioHardwareDestroyProcessTap",
                status,
            });
        }
        Ok(())
    }
}

/// Check whether the process tap API is present at runtime. Taps shipped
/// in macOS 14.4; on older systems the symbol is absent and the engine
/// should report a visible failure instead of attempting a session.
pub fn is_process_tap_available() -> bool {
    use std::ffi::CString;

    unsafe {
        let frameworks = ["AudioToolbox", "CoreAudio", "AudioUnit"];

        for framework in &frameworks {
            let lib_name = CString::new(*framework).unwrap();
            let lib_handle = libc::dlopen(lib_name.as_ptr(), libc::RTLD_LAZY);
            if lib_handle.is_null() {
                continue;
            }

            let func_name = CString::new("AudioHardwareCreateProcessTap").unwrap();
            let func_ptr = libc::dlsym(lib_handle, func_name.as_ptr());
            libc::dlclose(lib_handle);

            if !func_ptr.is_null() {
                debug!(framework, "found AudioHardwareCreateProcessTap");
                return true;
            }
        }

        warn!("AudioHardwareCreateProcessTap not found in any framework");
        false
    }
}
