//! Config key resolution
//!
//! Camera firmware names the same setting differently per vendor and per model ("iso" vs
//! "isospeed"), and some models simply lack a setting. Resolution tries the candidates for
//! each semantic parameter in order and keeps the first key the camera answers for.
//!
//! Lookups are strictly sequential. The candidate order is a preference order, and the camera
//! session cannot take concurrent queries anyway.

use crate::transport::CameraTransport;
use crate::types::{AliasEntry, AliasMap, CandidateTable, SemanticParam};

/// Return the first candidate whose choices query succeeds. Candidates after the first hit
/// are never queried.
pub fn first_working_candidate<T>(
    transport: &mut T,
    param: SemanticParam,
    candidates: &[String],
) -> Option<AliasEntry>
where
    T: CameraTransport + ?Sized,
{
    for key in candidates {
        match transport.get_config_choices(key) {
            Ok(choices) => {
                log::debug!(
                    "Resolved {} to '{}' ({} choices)",
                    param,
                    key,
                    choices.len()
                );
                return Some(AliasEntry {
                    key: key.clone(),
                    choices,
                });
            }
            Err(e) => log::debug!("{}: candidate '{}' unavailable: {}", param, key, e),
        }
    }
    None
}

/// Resolves every semantic parameter against one attached camera.
#[derive(Debug, Clone, Default)]
pub struct ConfigKeyResolver {
    table: CandidateTable,
}

impl ConfigKeyResolver {
    pub fn new(table: CandidateTable) -> Self {
        Self { table }
    }

    pub fn resolve<T>(&self, transport: &mut T, param: SemanticParam) -> Option<AliasEntry>
    where
        T: CameraTransport + ?Sized,
    {
        first_working_candidate(transport, param, self.table.candidates(param))
    }

    /// Build a fresh alias map. Parameters with no working candidate are left out and stay
    /// unavailable for the rest of the session.
    pub fn resolve_all<T>(&self, transport: &mut T) -> AliasMap
    where
        T: CameraTransport + ?Sized,
    {
        let mut aliases = AliasMap::new();
        for param in SemanticParam::ALL {
            match self.resolve(transport, param) {
                Some(entry) => aliases.insert(param, entry),
                None => log::info!("{} is not available on this camera", param),
            }
        }
        aliases
    }
}
