use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::settings::FlagValue;

/// Name of a permission, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionType(Cow<'static, str>);

impl PermissionType {
    pub const BUILD: Self = Self::builtin("BUILD");
    pub const BUILD_PLACE: Self = Self::builtin("BUILD_PLACE");
    pub const BUILD_DESTROY: Self = Self::builtin("BUILD_DESTROY");
    pub const DROP: Self = Self::builtin("DROP");
    pub const PICKUP: Self = Self::builtin("PICKUP");
    pub const SLEEP: Self = Self::builtin("SLEEP");
    pub const OPEN: Self = Self::builtin("OPEN");
    pub const OPEN_CHEST: Self = Self::builtin("OPEN_CHEST");
    pub const OPEN_CRAFT: Self = Self::builtin("OPEN_CRAFT");
    pub const OPEN_FURNACE: Self = Self::builtin("OPEN_FURNACE");
    pub const USE: Self = Self::builtin("USE");
    pub const USE_DOOR: Self = Self::builtin("USE_DOOR");
    pub const USE_BUTTON: Self = Self::builtin("USE_BUTTON");
    pub const USE_LEVER: Self = Self::builtin("USE_LEVER");
    pub const ANIMAL_KILL: Self = Self::builtin("ANIMAL_KILL");
    pub const MOB_KILL: Self = Self::builtin("MOB_KILL");
    pub const BUCKET_WATER: Self = Self::builtin("BUCKET_WATER");
    pub const BUCKET_LAVA: Self = Self::builtin("BUCKET_LAVA");
    pub const FIRE: Self = Self::builtin("FIRE");
    pub const TNT: Self = Self::builtin("TNT");
    pub const LAND_ENTER: Self = Self::builtin("LAND_ENTER");
    pub const LAND_NOTIFY: Self = Self::builtin("LAND_NOTIFY");
    pub const RESIDENT_MANAGER: Self = Self::builtin("RESIDENT_MANAGER");
    pub const LAND_CREATE: Self = Self::builtin("LAND_CREATE");

    const fn builtin(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: &str) -> Self {
        Self(Cow::Owned(name.trim().to_uppercase()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a land flag, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlagType(Cow<'static, str>);

impl FlagType {
    pub const FIRESPREAD: Self = Self::builtin("FIRESPREAD");
    pub const FIRE: Self = Self::builtin("FIRE");
    pub const EXPLOSION: Self = Self::builtin("EXPLOSION");
    pub const CREEPER_EXPLOSION: Self = Self::builtin("CREEPER_EXPLOSION");
    pub const TNT_EXPLOSION: Self = Self::builtin("TNT_EXPLOSION");
    pub const CREEPER_DAMAGE: Self = Self::builtin("CREEPER_DAMAGE");
    pub const ENDERMAN_DAMAGE: Self = Self::builtin("ENDERMAN_DAMAGE");
    pub const MOB_SPAWN: Self = Self::builtin("MOB_SPAWN");
    pub const ANIMAL_SPAWN: Self = Self::builtin("ANIMAL_SPAWN");
    pub const LEAF_DECAY: Self = Self::builtin("LEAF_DECAY");
    pub const CROP_TRAMPLE: Self = Self::builtin("CROP_TRAMPLE");
    pub const LAVA_FLOW: Self = Self::builtin("LAVA_FLOW");
    pub const WATER_FLOW: Self = Self::builtin("WATER_FLOW");
    pub const FULL_PVP: Self = Self::builtin("FULL_PVP");
    pub const MESSAGE_JOIN: Self = Self::builtin("MESSAGE_JOIN");
    pub const MESSAGE_QUIT: Self = Self::builtin("MESSAGE_QUIT");
    pub const ECO_BLOCK_PRICE: Self = Self::builtin("ECO_BLOCK_PRICE");
    pub const EXCLUDE_COMMANDS: Self = Self::builtin("EXCLUDE_COMMANDS");
    pub const SPAWN: Self = Self::builtin("SPAWN");
    pub const INHERIT_OWNER: Self = Self::builtin("INHERIT_OWNER");
    pub const INHERIT_RESIDENTS: Self = Self::builtin("INHERIT_RESIDENTS");
    pub const INHERIT_TENANT: Self = Self::builtin("INHERIT_TENANT");

    const fn builtin(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: &str) -> Self {
        Self(Cow::Owned(name.trim().to_uppercase()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PermissionDef {
    default: bool,
    parent: Option<PermissionType>,
}

/// Known permission and flag types with their hard-coded defaults.
///
/// Types missing from the registry are still accepted everywhere (data
/// written by another version must load); they default to `false`.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionsRegistry {
    permissions: BTreeMap<PermissionType, PermissionDef>,
    flags: BTreeMap<FlagType, FlagValue>,
}

impl Default for PermissionsRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for (pt, default) in [
            (PermissionType::BUILD, true),
            (PermissionType::DROP, true),
            (PermissionType::PICKUP, true),
            (PermissionType::SLEEP, true),
            (PermissionType::OPEN, true),
            (PermissionType::USE, true),
            (PermissionType::ANIMAL_KILL, true),
            (PermissionType::MOB_KILL, true),
            (PermissionType::BUCKET_WATER, true),
            (PermissionType::BUCKET_LAVA, true),
            (PermissionType::FIRE, true),
            (PermissionType::TNT, true),
            (PermissionType::LAND_ENTER, true),
            (PermissionType::LAND_NOTIFY, false),
            (PermissionType::RESIDENT_MANAGER, false),
            (PermissionType::LAND_CREATE, false),
        ] {
            registry.register_permission(pt, default, None);
        }
        for (pt, parent) in [
            (PermissionType::BUILD_PLACE, PermissionType::BUILD),
            (PermissionType::BUILD_DESTROY, PermissionType::BUILD),
            (PermissionType::OPEN_CHEST, PermissionType::OPEN),
            (PermissionType::OPEN_CRAFT, PermissionType::OPEN),
            (PermissionType::OPEN_FURNACE, PermissionType::OPEN),
            (PermissionType::USE_DOOR, PermissionType::USE),
            (PermissionType::USE_BUTTON, PermissionType::USE),
            (PermissionType::USE_LEVER, PermissionType::USE),
        ] {
            registry.register_permission(pt, true, Some(parent));
        }

        for ft in [
            FlagType::FIRESPREAD,
            FlagType::FIRE,
            FlagType::EXPLOSION,
            FlagType::CREEPER_EXPLOSION,
            FlagType::TNT_EXPLOSION,
            FlagType::CREEPER_DAMAGE,
            FlagType::ENDERMAN_DAMAGE,
            FlagType::MOB_SPAWN,
            FlagType::ANIMAL_SPAWN,
            FlagType::LEAF_DECAY,
            FlagType::CROP_TRAMPLE,
            FlagType::LAVA_FLOW,
            FlagType::WATER_FLOW,
            FlagType::FULL_PVP,
            FlagType::INHERIT_OWNER,
            FlagType::INHERIT_RESIDENTS,
            FlagType::INHERIT_TENANT,
        ] {
            registry.register_flag(ft, FlagValue::Bool(true));
        }
        registry.register_flag(FlagType::MESSAGE_JOIN, FlagValue::Str(String::new()));
        registry.register_flag(FlagType::MESSAGE_QUIT, FlagValue::Str(String::new()));
        registry.register_flag(FlagType::SPAWN, FlagValue::Str(String::new()));
        registry.register_flag(FlagType::ECO_BLOCK_PRICE, FlagValue::Double(0.0));
        registry.register_flag(FlagType::EXCLUDE_COMMANDS, FlagValue::StrList(Vec::new()));
        registry
    }
}

impl PermissionsRegistry {
    pub fn empty() -> Self {
        Self {
            permissions: BTreeMap::new(),
            flags: BTreeMap::new(),
        }
    }

    pub fn register_permission(
        &mut self,
        permission: PermissionType,
        default: bool,
        parent: Option<PermissionType>,
    ) {
        self.permissions
            .insert(permission, PermissionDef { default, parent });
    }

    pub fn register_flag(&mut self, flag: FlagType, default: FlagValue) {
        self.flags.insert(flag, default);
    }

    pub fn is_permission_registered(&self, permission: &PermissionType) -> bool {
        self.permissions.contains_key(permission)
    }

    pub fn is_flag_registered(&self, flag: &FlagType) -> bool {
        self.flags.contains_key(flag)
    }

    pub fn permission_default(&self, permission: &PermissionType) -> bool {
        self.permissions
            .get(permission)
            .is_some_and(|def| def.default)
    }

    pub fn permission_parent(&self, permission: &PermissionType) -> Option<&PermissionType> {
        self.permissions
            .get(permission)
            .and_then(|def| def.parent.as_ref())
    }

    pub fn flag_default(&self, flag: &FlagType) -> FlagValue {
        self.flags
            .get(flag)
            .cloned()
            .unwrap_or(FlagValue::Bool(false))
    }

    /// A registered flag only accepts values of the same kind as its default.
    pub fn accepts_flag_value(&self, flag: &FlagType, value: &FlagValue) -> bool {
        match self.flags.get(flag) {
            Some(default) => default.same_kind(value),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_upper_case() {
        assert_eq!(PermissionType::new(" build "), PermissionType::BUILD);
        assert_eq!(FlagType::new("fire"), FlagType::FIRE);
    }

    #[test]
    fn builtin_parents_registered() {
        let registry = PermissionsRegistry::default();
        assert_eq!(
            registry.permission_parent(&PermissionType::BUILD_PLACE),
            Some(&PermissionType::BUILD)
        );
        assert_eq!(registry.permission_parent(&PermissionType::BUILD), None);
        assert!(registry.permission_default(&PermissionType::LAND_ENTER));
        assert!(!registry.permission_default(&PermissionType::LAND_NOTIFY));
    }

    #[test]
    fn unregistered_types_default_to_false() {
        let registry = PermissionsRegistry::default();
        let custom = PermissionType::new("CUSTOM_THING");
        assert!(!registry.is_permission_registered(&custom));
        assert!(!registry.permission_default(&custom));
        assert_eq!(
            registry.flag_default(&FlagType::new("CUSTOM_FLAG")),
            FlagValue::Bool(false)
        );
    }

    #[test]
    fn flag_value_kind_enforced_for_registered_flags() {
        let registry = PermissionsRegistry::default();
        assert!(registry.accepts_flag_value(&FlagType::FIRE, &FlagValue::Bool(false)));
        assert!(!registry.accepts_flag_value(&FlagType::FIRE, &FlagValue::Double(1.0)));
        assert!(registry.accepts_flag_value(&FlagType::new("OTHER"), &FlagValue::Double(1.0)));
    }
}
