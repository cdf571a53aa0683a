//! Default settings for points outside any land, per world and per land type.
//!
//! ```toml
//! [outside]
//! permissions = ["EVERYBODY:BUILD:true:true"]
//! flags = ["FIRESPREAD:false:true"]
//!
//! [worlds.nether]
//! flags = ["MOB_SPAWN:true:true"]
//!
//! [types.city]
//! permissions = ["VISITOR:BUILD:false:true"]
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::lands::{LandType, Lands};
use crate::permissions::{LandSettings, PermissionsRegistry};

/// Permission and flag wire strings for one pseudo-land.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SettingsTable {
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl SettingsTable {
    fn parse(&self, label: &str, registry: &PermissionsRegistry) -> Result<LandSettings, Vec<String>> {
        let settings = LandSettings::from_wires(&self.permissions, &self.flags)
            .map_err(|e| vec![format!("{}: {}", label, e)])?;
        let errors: Vec<String> = settings
            .flags()
            .filter(|flag| !registry.accepts_flag_value(&flag.flag_type, &flag.value))
            .map(|flag| {
                format!(
                    "{}: flag {} does not accept value {}",
                    label,
                    flag.flag_type.name(),
                    flag.value.to_wire()
                )
            })
            .collect();
        if errors.is_empty() {
            Ok(settings)
        } else {
            Err(errors)
        }
    }
}

type ParsedDefaults = (
    LandSettings,
    Vec<(String, LandSettings)>,
    Vec<(String, LandSettings)>,
);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub outside: SettingsTable,
    #[serde(default)]
    pub worlds: BTreeMap<String, SettingsTable>,
    #[serde(default)]
    pub types: BTreeMap<String, SettingsTable>,
}

impl DefaultsConfig {
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        Self::from_toml_str(&content, path)
    }

    pub fn from_toml_str(content: &str, source_path: &Path) -> Result<Self, String> {
        let config: DefaultsConfig =
            toml::from_str(content).map_err(|e| format!("{}: {}", source_path.display(), e))?;
        config
            .validate(&PermissionsRegistry::default())
            .map_err(|e| format!("{}:\n{}", source_path.display(), e))?;
        Ok(config)
    }

    /// Parse every table, reporting all bad entries at once.
    pub fn validate(&self, registry: &PermissionsRegistry) -> Result<(), String> {
        self.parse_all(registry).map(|_| ())
    }

    /// Install the parsed tables into `lands`. Nothing is applied if any
    /// table fails to parse.
    pub fn apply(&self, lands: &mut Lands) -> Result<(), String> {
        let (outside, worlds, types) = self.parse_all(lands.registry())?;
        lands.set_outside_defaults(outside);
        for (world, settings) in worlds {
            lands.set_world_defaults(&world, settings);
        }
        for (land_type, settings) in types {
            lands.set_type_defaults(LandType::new(&land_type), settings);
        }
        info!(
            worlds = self.worlds.len(),
            types = self.types.len(),
            "default settings applied"
        );
        Ok(())
    }

    fn parse_all(&self, registry: &PermissionsRegistry) -> Result<ParsedDefaults, String> {
        let mut errors = Vec::new();
        let mut collect = |label: String, table: &SettingsTable| match table.parse(&label, registry) {
            Ok(settings) => Some(settings),
            Err(mut e) => {
                errors.append(&mut e);
                None
            }
        };

        let outside = collect("outside".to_string(), &self.outside);
        let worlds: Vec<_> = self
            .worlds
            .iter()
            .filter_map(|(name, table)| {
                collect(format!("worlds.{}", name), table).map(|s| (name.clone(), s))
            })
            .collect();
        let types: Vec<_> = self
            .types
            .iter()
            .filter_map(|(name, table)| {
                collect(format!("types.{}", name), table).map(|s| (name.clone(), s))
            })
            .collect();

        match outside {
            Some(outside) if errors.is_empty() => Ok((outside, worlds, types)),
            _ => Err(errors.join("\n")),
        }
    }
}
