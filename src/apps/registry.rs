use std::collections::HashMap;

use super::AppKind;
use crate::{
    config::{Config, ConfigError},
    error::ValidationError,
    Address,
};

/// Maps on-chain app definitions to the app kinds this node can run.
/// Built once at startup, never changed afterwards.
#[derive(Debug, Clone, Default)]
pub struct AppRegistry {
    kinds: HashMap<Address, AppKind>,
}

impl AppRegistry {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut kinds = HashMap::new();
        kinds.insert(config.network.identity_app, AppKind::FreeBalance);

        for entry in &config.apps {
            if entry.kind == AppKind::FreeBalance {
                return Err(ConfigError::ReservedKind(entry.kind));
            }
            if kinds.insert(entry.definition, entry.kind).is_some() {
                return Err(ConfigError::DuplicateDefinition(entry.definition));
            }
        }
        Ok(Self { kinds })
    }

    pub fn kind_of(&self, definition: &Address) -> Option<AppKind> {
        self.kinds.get(definition).copied()
    }

    pub fn resolve(&self, definition: &Address) -> Result<AppKind, ValidationError> {
        self.kind_of(definition)
            .ok_or(ValidationError::UnknownAppDefinition(*definition))
    }

    pub fn definition_of(&self, kind: AppKind) -> Option<Address> {
        self.kinds
            .iter()
            .find(|(_, k)| **k == kind)
            .map(|(def, _)| *def)
    }
}
