// Shared type definitions for the selective mute engine
//
// This module provides the data model, status values, and error taxonomy
// used across the mute session lifecycle and its orchestration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// OS process identifier.
pub type Pid = u32;

/// The audio subsystem's opaque identifier for a process's audio
/// participation. Distinct from the OS pid: a process only has one of
/// these while the audio subsystem has adopted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AudioProcessObject(pub u32);

/// Handle to a process tap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TapHandle(pub u32);

/// Handle to an aggregate device wrapping a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

/// Opaque token for an installed IO proc registration on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoProcToken(pub usize);

/// One running application. An app can have helper processes; all of them
/// are grouped under the same bundle id and contribute to the same mute
/// target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningApp {
    pub bundle_id: String,
    pub display_name: String,
    pub pids: BTreeSet<Pid>,
}

/// Externally-observable orchestrator status.
///
/// Serializes with kebab-case tags (`disabled`, `enabled-idle`,
/// `enabled-active`, `enabled-error`) for UI consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "kebab-case")]
pub enum MuteStatus {
    Disabled,
    EnabledIdle,
    EnabledActive,
    EnabledError(String),
}

/// Errors that can occur while building a mute session.
#[derive(Debug, thiserror::Error)]
pub enum TapEngineError {
    #[error("selection resolved to zero live audio processes")]
    NoTargetProcesses,

    #[error("could not create IO proc on aggregate device: {}", format_osstatus(*status))]
    IoResourceUnavailable { status: i32 },

    #[error("{operation} failed: {}", format_osstatus(*status))]
    PlatformCallFailure {
        operation: &'static str,
        status: i32,
    },
}

pub type Result<T> = std::result::Result<T, TapEngineError>;

/// Convert OSStatus error codes to human-readable messages.
///
/// Unknown codes are decoded as a FourCC where all four bytes are
/// printable, which is how Core Audio spells most of its errors.
pub fn format_osstatus(status: i32) -> String {
    match status {
        0 => "no error".to_string(),
        -50 => "parameter error".to_string(),
        -4 => "unimplemented on this system".to_string(),
        1852797029 => "audio hardware not running".to_string(),
        2003329396 => "audio hardware unspecified error".to_string(),
        2003332927 => "audio hardware unknown property".to_string(),
        560492391 => "audio hardware not permitted".to_string(),
        _ => {
            let code = status as u32;
            let fourcc = [
                ((code >> 24) & 0xFF) as u8,
                ((code >> 16) & 0xFF) as u8,
                ((code >> 8) & 0xFF) as u8,
                (code & 0xFF) as u8,
            ];
            if fourcc.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
                format!(
                    "OSStatus {} ('{}')",
                    status,
                    String::from_utf8_lossy(&fourcc)
                )
            } else {
                format!("OSStatus {}", status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        assert_eq!(format_osstatus(0), "no error");
        assert_eq!(format_osstatus(-50), "parameter error");
        // Codes outside the known table decode to their FourCC spelling
        let decoded = format_osstatus(0x216b6579_u32 as i32);
        assert!(decoded.contains("!key"), "got: {}", decoded);
        // The table wins over FourCC decoding ('who?' is a known code)
        assert_eq!(
            format_osstatus(0x77686f3f_u32 as i32),
            "audio hardware unknown property"
        );
        // Codes with non-printable bytes fall back to the raw number
        assert_eq!(format_osstatus(-1), "OSStatus -1");
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let json = serde_json::to_value(&MuteStatus::EnabledIdle).unwrap();
        assert_eq!(json["state"], "enabled-idle");

        let json = serde_json::to_value(&MuteStatus::EnabledError("boom".into())).unwrap();
        assert_eq!(json["state"], "enabled-error");
        assert_eq!(json["message"], "boom");
    }

    #[test]
    fn test_platform_failure_message_names_operation() {
        let err = TapEngineError::PlatformCallFailure {
            operation: "AudioHardwareCreateAggregateDevice",
            status: -50,
        };
        let msg = err.to_string();
        assert!(msg.contains("AudioHardwareCreateAggregateDevice"));
        assert!(msg.contains("parameter error"));
    }
}
