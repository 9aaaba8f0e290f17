//! Control-channel JSON frames.
//!
//! Every frame is `{"event": <name>, "data": {...}}`.
//!
//! # Example
//!
//! ```
//! use audio_link_esp32::session::{InboundCommand, OutboundEvent};
//!
//! let cmd = InboundCommand::parse(r#"{"event":"start_recording","data":{"duration":9999}}"#).unwrap();
//! assert_eq!(cmd, InboundCommand::StartRecording { duration: 60 });
//!
//! let frame = OutboundEvent::RecordingStarted { duration: 60 }.to_json();
//! assert_eq!(frame, r#"{"event":"recording_started","data":{"duration":60}}"#);
//! ```

use super::SessionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capture length used when `start_recording` carries none.
pub const DEFAULT_RECORD_SECS: u32 = 5;
/// Shortest accepted capture.
pub const MIN_RECORD_SECS: u32 = 1;
/// Longest accepted capture.
pub const MAX_RECORD_SECS: u32 = 60;
/// Clip played when `play_pcm` carries no id.
pub const DEFAULT_CLIP_ID: i64 = 1;

/// Device → server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    DeviceConnected {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "type")]
        device_type: String,
    },
    RecordingStarted {
        duration: u32,
    },
    RecordComplete {
        size: usize,
        duration: u32,
    },
    #[serde(rename = "play_pcm_result")]
    PlayPcmResult {
        id: i64,
        status: &'static str,
    },
    RestartAck {
        status: &'static str,
    },
}

impl OutboundEvent {
    /// `play_pcm_result` for a playback outcome.
    pub fn play_result(id: i64, ok: bool) -> Self {
        Self::PlayPcmResult {
            id,
            status: if ok { "ok" } else { "fail" },
        }
    }

    /// `restart_ack` with status ok.
    pub fn restart_ack() -> Self {
        Self::RestartAck { status: "ok" }
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> String {
        // Plain structs of strings and integers always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Server → device commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCommand {
    /// Capture audio for `duration` seconds (already clamped).
    StartRecording { duration: u32 },
    /// Play clip `id`.
    PlayPcm { id: i64 },
    /// Acknowledge and restart.
    Restart,
    /// Anything else; logged and ignored.
    Unknown(String),
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Clamp a requested capture length to the accepted range.
pub fn clamp_duration(requested: i64) -> u32 {
    requested.clamp(MIN_RECORD_SECS as i64, MAX_RECORD_SECS as i64) as u32
}

fn number_field(data: Option<&Value>, name: &str) -> Option<i64> {
    let value = data?.get(name)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

impl InboundCommand {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| SessionError::Malformed(e.to_string()))?;
        let data = frame.data.as_ref();

        Ok(match frame.event.as_str() {
            "start_recording" => Self::StartRecording {
                duration: number_field(data, "duration")
                    .map_or(DEFAULT_RECORD_SECS, clamp_duration),
            },
            "play_pcm" => Self::PlayPcm {
                id: number_field(data, "id").unwrap_or(DEFAULT_CLIP_ID),
            },
            "restart" => Self::Restart,
            _ => Self::Unknown(frame.event),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_connected_frame() {
        let frame = OutboundEvent::DeviceConnected {
            client_id: "esp32s3-001".into(),
            device_type: "esp32s3".into(),
        }
        .to_json();
        assert_eq!(
            frame,
            r#"{"event":"device_connected","data":{"clientId":"esp32s3-001","type":"esp32s3"}}"#
        );
    }

    #[test]
    fn test_result_frames() {
        assert_eq!(
            OutboundEvent::RecordComplete {
                size: 320000,
                duration: 5
            }
            .to_json(),
            r#"{"event":"record_complete","data":{"size":320000,"duration":5}}"#
        );
        assert_eq!(
            OutboundEvent::play_result(3, false).to_json(),
            r#"{"event":"play_pcm_result","data":{"id":3,"status":"fail"}}"#
        );
        assert_eq!(
            OutboundEvent::restart_ack().to_json(),
            r#"{"event":"restart_ack","data":{"status":"ok"}}"#
        );
    }

    #[test]
    fn test_duration_clamping() {
        assert_eq!(clamp_duration(0), 1);
        assert_eq!(clamp_duration(-7), 1);
        assert_eq!(clamp_duration(9999), 60);
        assert_eq!(clamp_duration(12), 12);

        let cmd = InboundCommand::parse(r#"{"event":"start_recording","data":{"duration":0}}"#);
        assert_eq!(cmd.unwrap(), InboundCommand::StartRecording { duration: 1 });
    }

    #[test]
    fn test_defaults_when_data_missing() {
        assert_eq!(
            InboundCommand::parse(r#"{"event":"start_recording"}"#).unwrap(),
            InboundCommand::StartRecording { duration: 5 }
        );
        assert_eq!(
            InboundCommand::parse(r#"{"event":"start_recording","data":{"duration":"long"}}"#)
                .unwrap(),
            InboundCommand::StartRecording { duration: 5 }
        );
        assert_eq!(
            InboundCommand::parse(r#"{"event":"play_pcm","data":{}}"#).unwrap(),
            InboundCommand::PlayPcm { id: 1 }
        );
    }

    #[test]
    fn test_fractional_numbers_truncate() {
        assert_eq!(
            InboundCommand::parse(r#"{"event":"play_pcm","data":{"id":3.7}}"#).unwrap(),
            InboundCommand::PlayPcm { id: 3 }
        );
    }

    #[test]
    fn test_restart_and_unknown() {
        assert_eq!(
            InboundCommand::parse(r#"{"event":"restart"}"#).unwrap(),
            InboundCommand::Restart
        );
        assert_eq!(
            InboundCommand::parse(r#"{"event":"dance","data":{"style":"tango"}}"#).unwrap(),
            InboundCommand::Unknown("dance".into())
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert!(matches!(
            InboundCommand::parse("not json"),
            Err(SessionError::Malformed(_))
        ));
        assert!(matches!(
            InboundCommand::parse(r#"{"data":{}}"#),
            Err(SessionError::Malformed(_))
        ));
    }
}
