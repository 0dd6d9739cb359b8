use crate::errors::TetherError;
use crate::tether::events::SessionSnapshot;
use crate::types::{AliasMap, CameraParameters, ConnectionState, SemanticParam};
use uuid::Uuid;

#[derive(Debug)]
struct SessionData {
    id: Uuid,
    aliases: AliasMap,
    params: Option<CameraParameters>,
}

/// Last known camera state for the current session.
///
/// Aliases and parameters live inside the session record, so ending the session drops both
/// at once. Parameters are only ever replaced as a whole.
#[derive(Debug, Default)]
pub struct ParameterStore {
    session: Option<SessionData>,
    last_error: Option<String>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session with an empty alias map. Anything from a previous session is
    /// discarded.
    pub fn begin_session(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.session = Some(SessionData {
            id,
            aliases: AliasMap::new(),
            params: None,
        });
        self.last_error = None;
        id
    }

    /// Drop aliases and parameters. Returns the id of the session that ended, if any.
    pub fn end_session(&mut self) -> Option<Uuid> {
        self.session.take().map(|s| s.id)
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn install_aliases(&mut self, aliases: AliasMap) {
        if let Some(session) = self.session.as_mut() {
            session.aliases = aliases;
        }
    }

    /// Replace the snapshot wholesale. Returns `false` if nothing changed or no session is
    /// active.
    pub fn replace_parameters(&mut self, params: CameraParameters) -> bool {
        match self.session.as_mut() {
            Some(session) if session.params.as_ref() != Some(&params) => {
                session.params = Some(params);
                true
            }
            _ => false,
        }
    }

    pub fn parameters(&self) -> Option<&CameraParameters> {
        self.session.as_ref().and_then(|s| s.params.as_ref())
    }

    pub fn aliases(&self) -> Option<&AliasMap> {
        self.session.as_ref().map(|s| &s.aliases)
    }

    /// Vendor key a write to `param` must go to.
    pub fn write_target(&self, param: SemanticParam) -> Result<String, TetherError> {
        let session = self.session.as_ref().ok_or_else(|| {
            TetherError::DeviceUnavailable("no camera session is active".to_string())
        })?;
        session
            .aliases
            .get(param)
            .map(|entry| entry.key.clone())
            .ok_or(TetherError::UnsupportedParameter(param))
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn clear_error(&mut self) -> bool {
        self.last_error.take().is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn snapshot(&self, state: ConnectionState) -> SessionSnapshot {
        SessionSnapshot {
            state,
            session_id: self.session_id(),
            parameters: self.parameters().cloned(),
            aliases: self.aliases().cloned().unwrap_or_default(),
            last_error: self.last_error.clone(),
        }
    }
}
