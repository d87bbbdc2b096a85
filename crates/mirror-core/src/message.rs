//! Wire frames exchanged with clients.
//!
//! Frames are `{"event": "...", "data": {...}}` objects. Inbound frames are
//! validated here so nothing malformed reaches the engine.

use serde::{Deserialize, Serialize};

use crate::bucket::BucketKey;
use crate::domain::{Action, FieldState, MirrorError, Tone};
use crate::field::clamp_pad;
use crate::selector::{Decision, PolicySource};

/// A user's emotional reflection, optionally with an explicit PAD vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub emotion: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pad: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackAck {
    pub episode_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundFrame {
    FieldState(FieldState),
    Reflection(Reflection),
    FeedbackAck(FeedbackAck),
    Heartbeat,
}

impl InboundFrame {
    /// Decode and validate a client frame.
    pub fn from_json(raw: &str) -> Result<Self, MirrorError> {
        let frame: InboundFrame =
            serde_json::from_str(raw).map_err(|e| MirrorError::Message(e.to_string()))?;
        frame.validate()?;
        Ok(frame)
    }

    pub fn validate(&self) -> Result<(), MirrorError> {
        match self {
            InboundFrame::FieldState(state) => state.validate(),
            InboundFrame::Reflection(r) => {
                if r.emotion.trim().is_empty() {
                    return Err(MirrorError::Message("reflection without emotion".into()));
                }
                if let Some(pad) = r.pad {
                    if pad.iter().any(|v| !v.is_finite()) {
                        return Err(MirrorError::Message("reflection pad is not finite".into()));
                    }
                }
                Ok(())
            }
            InboundFrame::FeedbackAck(_) | InboundFrame::Heartbeat => Ok(()),
        }
    }
}

impl Reflection {
    /// PAD vector clamped into range, if one was supplied.
    pub fn clamped_pad(&self) -> Option<[f64; 3]> {
        self.pad.map(clamp_pad)
    }
}

/// Feedback payload pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackFrame {
    pub tone: Tone,
    pub intensity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub bucket_key: BucketKey,
    pub source: PolicySource,
    pub pad: [f64; 3],
    pub entropy: f64,
    pub coherence: f64,
    pub ts_ms: i64,
}

impl FeedbackFrame {
    pub fn from_decision(decision: &Decision, state: &FieldState) -> Self {
        let Action {
            tone,
            intensity,
            message,
        } = decision.action.clone();
        Self {
            tone,
            intensity,
            message,
            bucket_key: decision.bucket_key.clone(),
            source: decision.source,
            pad: state.pad,
            entropy: state.entropy,
            coherence: state.coherence,
            ts_ms: state.ts_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundFrame {
    NeuroFeedback(FeedbackFrame),
    AstroField(FieldState),
    Heartbeat,
}

impl OutboundFrame {
    pub fn to_json(&self) -> Result<String, MirrorError> {
        serde_json::to_string(self).map_err(|e| MirrorError::Message(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{FallbackPolicy, FieldHeuristic};
    use serde_json::json;

    #[test]
    fn decodes_field_state_frame() {
        let raw = json!({
            "event": "field_state",
            "data": {"pad": [0.3, 0.7, 0.2], "entropy": 0.4, "coherence": 0.6, "connected": 45, "ts_ms": 1}
        })
        .to_string();
        match InboundFrame::from_json(&raw).unwrap() {
            InboundFrame::FieldState(s) => assert_eq!(s.connected, 45),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn invalid_field_state_is_rejected() {
        let raw = json!({
            "event": "field_state",
            "data": {"pad": [1.3, 0.7, 0.2], "entropy": 0.4, "coherence": 0.6, "ts_ms": 1}
        })
        .to_string();
        assert!(matches!(
            InboundFrame::from_json(&raw),
            Err(MirrorError::InvalidState { field: "pad.pleasure", .. })
        ));
    }

    #[test]
    fn malformed_json_is_a_message_error() {
        assert!(matches!(
            InboundFrame::from_json("{not json"),
            Err(MirrorError::Message(_))
        ));
        assert!(matches!(
            InboundFrame::from_json(r#"{"event":"teleport","data":{}}"#),
            Err(MirrorError::Message(_))
        ));
    }

    #[test]
    fn reflection_requires_emotion() {
        let ok = r#"{"event":"reflection","data":{"emotion":"calm","pad":[2.0,0.5,-1.0]}}"#;
        match InboundFrame::from_json(ok).unwrap() {
            InboundFrame::Reflection(r) => assert_eq!(r.clamped_pad(), Some([1.0, 0.5, 0.0])),
            other => panic!("unexpected frame {:?}", other),
        }
        let empty = r#"{"event":"reflection","data":{"emotion":"  "}}"#;
        assert!(InboundFrame::from_json(empty).is_err());
    }

    #[test]
    fn heartbeat_has_no_payload() {
        assert_eq!(
            InboundFrame::from_json(r#"{"event":"heartbeat"}"#).unwrap(),
            InboundFrame::Heartbeat
        );
    }

    #[test]
    fn feedback_frame_serializes_with_event_tag() {
        let state = FieldState::new([0.3, 0.7, 0.2], 0.8, 0.2, 45, 1_704_119_400_000);
        let decision = Decision {
            action: FieldHeuristic.fallback(&state),
            bucket_key: crate::bucket::bucket_for(&state),
            source: PolicySource::Fallback,
            entry: None,
        };
        let frame = OutboundFrame::NeuroFeedback(FeedbackFrame::from_decision(&decision, &state));
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "neuro_feedback");
        assert_eq!(value["data"]["tone"], "warm");
        assert_eq!(value["data"]["source"], "fallback");
        assert_eq!(value["data"]["bucket_key"], "14-M-A");
    }
}
