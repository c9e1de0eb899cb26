//! Control-plane payload types
//!
//! The framing layer carries opaque UTF-8 text; these types define the
//! JSON payload schema the daemon and the ctl client agree on. The
//! `kind` field is the discriminator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A payload carried inside one control-plane frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlPayload {
    /// One log line streamed from the daemon to connected controllers
    LogLine(LogLine),
    /// A command sent from a controller to the daemon
    Command(Command),
    /// The daemon's reply to a command
    CommandReply(CommandReply),
}

/// A streamed log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

/// Commands a controller may issue against a running daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Report per-instance status and pending work counts
    Status,
    /// Toggle the force-update flag on one instance
    ForceUpdate { instance: String, enabled: bool },
    /// Mute or unmute the daemon's outbound log stream
    Mute { enabled: bool },
}

/// Reply to a [`Command`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub ok: bool,
    pub detail: String,
    /// Per-instance status rows, populated for `Status`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceStatus>,
}

/// Status of one importer instance as reported over the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub name: String,
    pub running: bool,
    pub force_update: bool,
    pub pending_files: usize,
}

impl ControlPayload {
    /// Serialize to the JSON text carried inside one frame
    pub fn to_frame_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the JSON text of one frame
    pub fn from_frame_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_command_discriminator() {
        let payload = ControlPayload::Command(Command::ForceUpdate {
            instance: "acme-scale-drop".into(),
            enabled: true,
        });
        let text = payload.to_frame_text().unwrap();
        assert!(text.contains("\"kind\":\"command\""));
        assert!(text.contains("\"command\":\"force_update\""));

        let back = ControlPayload::from_frame_text(&text).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let text = r#"{"kind":"telemetry","data":1}"#;
        assert!(ControlPayload::from_frame_text(text).is_err());
    }
}
