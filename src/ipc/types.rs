//! IPC message types for daemon communication.

use crate::gesture::GestureKind;
use crate::transform::{Language, TransformMode, TransformResult};
use serde::{Deserialize, Serialize};

/// Commands sent from a front-end or `ccai ctl` to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum IpcCommand {
    /// Get daemon status.
    Status,

    /// Stop the daemon.
    Stop,

    /// Run a transform. Omitted fields fall back to the settings defaults.
    Generate {
        text: String,
        #[serde(default)]
        mode: Option<TransformMode>,
        #[serde(default)]
        input_language: Option<Language>,
        #[serde(default)]
        output_language: Option<Language>,
    },

    /// Detect the language of `text` and suggest a mode.
    Estimate { text: String },

    GetSettings,

    /// Shallow-merge `settings` (an object keyed by group) and persist.
    SaveSettings { settings: serde_json::Value },

    SetCredential { api_key: String },

    DeleteCredential,

    StartMonitor,

    StopMonitor,

    ReadClipboard,

    /// Write to the clipboard without it counting as a user copy.
    WriteClipboard { text: String },

    ShowWindow,

    ToggleWindow,

    CloseWindow,

    /// Turn this connection into an event stream.
    Subscribe,

    /// Ping (for connection health check).
    Ping,
}

impl IpcCommand {
    /// Command name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            IpcCommand::Status => "status",
            IpcCommand::Stop => "stop",
            IpcCommand::Generate { .. } => "generate",
            IpcCommand::Estimate { .. } => "estimate",
            IpcCommand::GetSettings => "get_settings",
            IpcCommand::SaveSettings { .. } => "save_settings",
            IpcCommand::SetCredential { .. } => "set_credential",
            IpcCommand::DeleteCredential => "delete_credential",
            IpcCommand::StartMonitor => "start_monitor",
            IpcCommand::StopMonitor => "stop_monitor",
            IpcCommand::ReadClipboard => "read_clipboard",
            IpcCommand::WriteClipboard { .. } => "write_clipboard",
            IpcCommand::ShowWindow => "show_window",
            IpcCommand::ToggleWindow => "toggle_window",
            IpcCommand::CloseWindow => "close_window",
            IpcCommand::Subscribe => "subscribe",
            IpcCommand::Ping => "ping",
        }
    }
}

/// Response from daemon. Failures never cross the boundary as anything but
/// `{ok: false, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    /// Success carrying `data`; serialization failure becomes an error
    /// response.
    pub fn with_data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                data: Some(value),
                error: None,
            },
            Err(e) => Self::error(&format!("Failed to encode response: {}", e)),
        }
    }

    pub fn pong() -> Self {
        Self::with_data(&serde_json::json!({
            "timestamp": chrono::Utc::now().timestamp_millis()
        }))
    }

    pub fn error(msg: &str) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.to_string()),
        }
    }
}

/// Daemon status information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub version: String,
    pub pid: u32,
    pub monitor_running: bool,
    pub provider_configured: bool,
    pub window_visible: bool,
    pub copy_window_ms: u64,
    pub auto_clipboard: bool,
}

/// Events pushed from daemon to subscribed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IpcEvent {
    /// A copy gesture completed.
    Gesture {
        kind: GestureKind,
        text: String,
        timestamp: String,
    },

    TransformCompleted { result: TransformResult },

    TransformFailed { message: String },

    /// Clipboard monitor started or stopped.
    MonitorState { running: bool },

    /// Presentation window shown or hidden.
    WindowVisibility { visible: bool },

    /// Daemon shutting down.
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_command_defaults() {
        let cmd: IpcCommand =
            serde_json::from_str(r#"{"cmd": "generate", "text": "hello"}"#).unwrap();
        assert_eq!(
            cmd,
            IpcCommand::Generate {
                text: "hello".to_string(),
                mode: None,
                input_language: None,
                output_language: None,
            }
        );
        assert_eq!(cmd.name(), "generate");
    }

    #[test]
    fn test_generate_command_full() {
        let cmd: IpcCommand = serde_json::from_str(
            r#"{"cmd": "generate", "text": "hi", "mode": "polite", "output_language": "ja"}"#,
        )
        .unwrap();
        match cmd {
            IpcCommand::Generate {
                mode,
                output_language,
                ..
            } => {
                assert_eq!(mode, Some(TransformMode::Polite));
                assert_eq!(output_language, Some(Language::Japanese));
            }
            _ => panic!("Expected Generate command"),
        }
    }

    #[test]
    fn test_unit_commands_parse() {
        for name in [
            "status",
            "stop",
            "get_settings",
            "delete_credential",
            "start_monitor",
            "stop_monitor",
            "read_clipboard",
            "show_window",
            "toggle_window",
            "close_window",
            "subscribe",
            "ping",
        ] {
            let cmd: IpcCommand =
                serde_json::from_str(&format!(r#"{{"cmd": "{}"}}"#, name)).unwrap();
            assert_eq!(cmd.name(), name);
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<IpcCommand>(r#"{"cmd": "history_list"}"#).is_err());
    }

    #[test]
    fn test_save_settings_carries_object() {
        let cmd: IpcCommand = serde_json::from_str(
            r#"{"cmd": "save_settings", "settings": {"output": {"auto_clipboard": false}}}"#,
        )
        .unwrap();
        match cmd {
            IpcCommand::SaveSettings { settings } => {
                assert_eq!(settings["output"]["auto_clipboard"], false)
            }
            _ => panic!("Expected SaveSettings command"),
        }
    }

    #[test]
    fn test_response_shapes() {
        let json = serde_json::to_string(&IpcResponse::ok()).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);

        let json = serde_json::to_string(&IpcResponse::error("nope")).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"nope"}"#);

        let response = IpcResponse::with_data(&serde_json::json!({"visible": true}));
        assert!(response.ok);
        assert_eq!(response.data.unwrap()["visible"], true);
    }

    #[test]
    fn test_pong_response() {
        let response = IpcResponse::pong();
        assert!(response.ok);
        let ts = response.data.unwrap()["timestamp"].as_i64().unwrap();
        assert!(ts > 1_577_836_800_000);
    }

    #[test]
    fn test_gesture_event_serialization() {
        let event = IpcEvent::Gesture {
            kind: GestureKind::DoubleCopy,
            text: "bar".to_string(),
            timestamp: "2025-01-15T10:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"gesture\""));
        assert!(json.contains("\"kind\":\"double_copy\""));
    }

    #[test]
    fn test_window_event_serialization() {
        let json = serde_json::to_string(&IpcEvent::WindowVisibility { visible: true }).unwrap();
        assert_eq!(json, r#"{"event":"window_visibility","visible":true}"#);
    }
}
