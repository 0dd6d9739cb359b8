//! What a session tells the outside world.
//!
//! Events are broadcast as they happen; the latest [`SessionSnapshot`] is also kept on a
//! watch channel for consumers that only care about current state.

use crate::types::{
    AliasMap, CameraParameters, CaptureResult, ConnectionState, SemanticParam,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StatusChanged {
        state: ConnectionState,
        session_id: Option<Uuid>,
    },
    AliasesResolved {
        resolved: Vec<SemanticParam>,
        unavailable: Vec<SemanticParam>,
    },
    /// Emitted only when a read returned something different from the previous snapshot.
    ParametersUpdated { parameters: CameraParameters },
    Captured { result: CaptureResult },
    Error { message: String },
}

/// How a host should present one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterControl {
    /// Writable through `key`, offering the choices the camera reported.
    Selector {
        key: String,
        choices: Vec<String>,
        current: Option<String>,
    },
    /// No key resolved this session. Show the value, if any, read-only.
    Fixed { current: Option<String> },
}

impl ParameterControl {
    pub fn is_writable(&self) -> bool {
        matches!(self, ParameterControl::Selector { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub session_id: Option<Uuid>,
    pub parameters: Option<CameraParameters>,
    pub aliases: AliasMap,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn control(&self, param: SemanticParam) -> ParameterControl {
        let current = self
            .parameters
            .as_ref()
            .and_then(|p| p.value_of(param))
            .map(str::to_string);

        match self.aliases.get(param) {
            Some(entry) => ParameterControl::Selector {
                key: entry.key.clone(),
                choices: entry.choices.clone(),
                current,
            },
            None => ParameterControl::Fixed { current },
        }
    }

    pub fn choices(&self, param: SemanticParam) -> Option<&[String]> {
        self.aliases.get(param).map(|e| e.choices.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AliasEntry;

    #[test]
    fn test_control_degrades_without_alias() {
        let mut snapshot = SessionSnapshot {
            state: ConnectionState::Connected,
            ..Default::default()
        };
        snapshot.aliases.insert(
            SemanticParam::Iso,
            AliasEntry {
                key: "isospeed".to_string(),
                choices: vec!["100".to_string(), "200".to_string()],
            },
        );

        assert!(snapshot.control(SemanticParam::Iso).is_writable());
        assert_eq!(
            snapshot.control(SemanticParam::ShootingMode),
            ParameterControl::Fixed { current: None }
        );
        assert_eq!(snapshot.choices(SemanticParam::Iso).map(<[String]>::len), Some(2));
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = SessionEvent::Error {
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");
    }
}
