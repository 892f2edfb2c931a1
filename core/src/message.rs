//! Pipeline messages
//!
//! A single closed set of message kinds travels through every topic. The
//! same [`DataMessage`] is reused at each stage and progressively enriched,
//! so every field is optional and encodes as an explicit `null` when it has
//! not been computed yet.
//!
//! Wire form is a JSON object with a `type` discriminator (`DATA`, `ALIGN`,
//! `CMD`) plus every declared field of that kind.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Command name used as the shutdown signal
pub const CMD_STOP: &str = "stop";

/// Command name that clears the alignment stars
pub const CMD_RESET: &str = "reset";

/// Encoder sample, enriched along the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataMessage {
    /// Host time the sample was taken (or re-stamped by the coordinator)
    pub time: Option<DateTime<Utc>>,
    /// Firmware clock in milliseconds
    pub sensor_ms: Option<u64>,
    /// Raw encoder counts
    pub phi_cnt: Option<i64>,
    pub theta_cnt: Option<i64>,
    /// Telescope angles straight from the encoders
    pub phi_raw: Option<f64>,
    pub theta_raw: Option<f64>,
    /// Telescope angles after the pointing model
    pub phi: Option<f64>,
    pub theta: Option<f64>,
    /// Horizontal frame
    pub azi: Option<f64>,
    pub alt: Option<f64>,
    /// Equatorial frame, `ra` in hours
    pub ra: Option<f64>,
    pub dec: Option<f64>,
}

/// Calibration target or result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignMessage {
    pub time: Option<DateTime<Utc>>,
    pub azi: Option<f64>,
    pub alt: Option<f64>,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub phi: Option<f64>,
    pub theta: Option<f64>,
}

/// Control command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmdMessage {
    pub cmd: Option<String>,
    pub opt: Option<serde_json::Value>,
}

impl CmdMessage {
    /// The poison pill
    pub fn stop() -> Self {
        Self {
            cmd: Some(CMD_STOP.to_string()),
            opt: None,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.cmd.as_deref() == Some(CMD_STOP)
    }

    pub fn reset() -> Self {
        Self {
            cmd: Some(CMD_RESET.to_string()),
            opt: None,
        }
    }

    pub fn is_reset(&self) -> bool {
        self.cmd.as_deref() == Some(CMD_RESET)
    }
}

/// Any message carried on a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Message {
    Data(DataMessage),
    Align(AlignMessage),
    Cmd(CmdMessage),
}

/// Outcome of decoding a well-formed message
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(Message),
    /// The `type` discriminator names no known kind
    Unrecognized(String),
}

impl Message {
    pub fn stop() -> Self {
        Message::Cmd(CmdMessage::stop())
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Message::Cmd(cmd) if cmd.is_stop())
    }

    pub fn reset() -> Self {
        Message::Cmd(CmdMessage::reset())
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, Message::Cmd(cmd) if cmd.is_reset())
    }

    /// Discriminator as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Data(_) => "DATA",
            Message::Align(_) => "ALIGN",
            Message::Cmd(_) => "CMD",
        }
    }

    pub fn encode(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a message.
    ///
    /// Malformed JSON and a missing `type` are errors; an unknown `type`
    /// is reported as [`Decoded::Unrecognized`] for the caller to handle.
    pub fn decode(text: &str) -> CoreResult<Decoded> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let kind = match value.get("type").and_then(serde_json::Value::as_str) {
            Some(kind) => kind.to_string(),
            None => return Err(CoreError::MissingMessageType(text.to_string())),
        };

        match kind.as_str() {
            "DATA" | "ALIGN" | "CMD" => Ok(Decoded::Message(serde_json::from_value(value)?)),
            _ => Ok(Decoded::Unrecognized(kind)),
        }
    }
}

impl From<DataMessage> for Message {
    fn from(msg: DataMessage) -> Self {
        Message::Data(msg)
    }
}

impl From<AlignMessage> for Message {
    fn from(msg: AlignMessage) -> Self {
        Message::Align(msg)
    }
}

impl From<CmdMessage> for Message {
    fn from(msg: CmdMessage) -> Self {
        Message::Cmd(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn round_trip(msg: &Message) -> Message {
        let text = msg.encode().unwrap();
        match Message::decode(&text).unwrap() {
            Decoded::Message(m) => m,
            Decoded::Unrecognized(kind) => panic!("unrecognized {}", kind),
        }
    }

    #[test]
    fn test_data_round_trip() {
        let msg = Message::Data(DataMessage {
            time: Some(Utc.with_ymd_and_hms(2022, 11, 17, 16, 14, 58).unwrap()),
            sensor_ms: Some(123456),
            phi_cnt: Some(-600),
            theta_cnt: Some(1200),
            phi_raw: Some(270.0),
            theta_raw: Some(-0.5),
            phi: Some(270.25),
            theta: Some(-0.5),
            ..Default::default()
        });
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn test_align_and_cmd_round_trip() {
        let align = Message::Align(AlignMessage {
            time: Some(Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap()),
            ra: Some(5.5),
            dec: Some(-12.25),
            ..Default::default()
        });
        assert_eq!(round_trip(&align), align);

        let cmd = Message::Cmd(CmdMessage {
            cmd: Some("goto".to_string()),
            opt: Some(serde_json::json!({"speed": 2})),
        });
        assert_eq!(round_trip(&cmd), cmd);
        assert_eq!(round_trip(&Message::stop()), Message::stop());
    }

    #[test]
    fn test_absent_fields_are_explicit_nulls() {
        let text = Message::Data(DataMessage::default()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        let map = value.as_object().unwrap();

        assert_eq!(map["type"], "DATA");
        for key in [
            "time", "sensor_ms", "phi_cnt", "theta_cnt", "phi_raw", "theta_raw", "phi", "theta",
            "azi", "alt", "ra", "dec",
        ] {
            assert!(map[key].is_null(), "{} should be null", key);
        }
        assert_eq!(map.len(), 13);
    }

    #[test]
    fn test_missing_fields_decode_as_absent() {
        let decoded = Message::decode(r#"{"type":"ALIGN","ra":1.5}"#).unwrap();
        assert_eq!(
            decoded,
            Decoded::Message(Message::Align(AlignMessage {
                ra: Some(1.5),
                ..Default::default()
            }))
        );
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        let decoded = Message::decode(r#"{"type":"PING","x":1}"#).unwrap();
        assert_eq!(decoded, Decoded::Unrecognized("PING".to_string()));
    }

    #[test]
    fn test_malformed_input_is_an_error() {
        assert!(matches!(
            Message::decode("{\"type\":"),
            Err(CoreError::MessageCodec(_))
        ));
        assert!(matches!(
            Message::decode(r#"{"ra":1.0}"#),
            Err(CoreError::MissingMessageType(_))
        ));
        assert!(matches!(
            Message::decode(r#"{"type":"DATA","phi":"north"}"#),
            Err(CoreError::MessageCodec(_))
        ));
    }

    #[test]
    fn test_stop() {
        assert!(Message::stop().is_stop());
        assert!(!Message::Cmd(CmdMessage::default()).is_stop());
        assert!(!Message::Data(DataMessage::default()).is_stop());
        assert_eq!(Message::stop().kind(), "CMD");
    }

    #[test]
    fn test_reset_command() {
        let text = r#"{"type":"CMD","cmd":"reset","opt":null}"#;
        match Message::decode(text).unwrap() {
            Decoded::Message(msg) => {
                assert!(msg.is_reset());
                assert!(!msg.is_stop());
                assert_eq!(msg, Message::reset());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
