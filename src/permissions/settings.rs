//! Permission and flag values plus the per-land tables holding them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::registry::{FlagType, PermissionType};
use crate::players::PlayerContainer;
use crate::wire::{self, WireError};

/// Typed value of a flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FlagValue {
    Bool(bool),
    Double(f64),
    Str(String),
    StrList(Vec<String>),
}

impl FlagValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlagValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FlagValue::StrList(items) => Some(items),
            _ => None,
        }
    }

    pub fn same_kind(&self, other: &FlagValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn to_wire(&self) -> String {
        match self {
            FlagValue::Bool(b) => b.to_string(),
            FlagValue::Double(d) => format!("{:?}", d),
            FlagValue::Str(s) => wire::quote(s),
            FlagValue::StrList(items) => {
                let quoted: Vec<String> = items.iter().map(|i| wire::quote(i)).collect();
                format!("[{}]", quoted.join(","))
            }
        }
    }

    pub fn from_wire(value: &str) -> Result<Self, WireError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(WireError::Empty);
        }
        if let Some(body) = value.strip_prefix('[') {
            let body = body
                .strip_suffix(']')
                .ok_or_else(|| WireError::Quote(value.to_string()))?;
            return Ok(FlagValue::StrList(wire::split_quoted_list(body)?));
        }
        if value.starts_with('\'') {
            return Ok(FlagValue::Str(wire::unquote(value)?));
        }
        if let Ok(b) = wire::parse_bool(value) {
            return Ok(FlagValue::Bool(b));
        }
        value
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite())
            .map(FlagValue::Double)
            .ok_or_else(|| WireError::Number(value.to_string()))
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub perm_type: PermissionType,
    pub value: bool,
    pub inheritable: bool,
}

impl Permission {
    pub fn new(perm_type: PermissionType, value: bool, inheritable: bool) -> Self {
        Self {
            perm_type,
            value,
            inheritable,
        }
    }

    /// `<container>:<PERM>:<value>:<inheritable>`. The container itself may
    /// contain a colon, so the three trailing fields are split from the right.
    pub fn to_wire(&self, container: &PlayerContainer) -> String {
        format!(
            "{}:{}:{}:{}",
            container.to_wire(),
            self.perm_type,
            self.value,
            self.inheritable
        )
    }

    pub fn from_wire(value: &str) -> Result<(PlayerContainer, Self), WireError> {
        let fields: Vec<&str> = value.rsplitn(4, ':').collect();
        let [inheritable, perm_value, perm_type, container] = fields.as_slice() else {
            return Err(WireError::FieldCount {
                expected: 4,
                got: fields.len(),
                value: value.to_string(),
            });
        };
        if perm_type.trim().is_empty() {
            return Err(WireError::Empty);
        }
        let container = PlayerContainer::from_wire(container)?;
        let permission = Permission::new(
            PermissionType::new(perm_type),
            wire::parse_bool(perm_value)?,
            wire::parse_bool(inheritable)?,
        );
        Ok((container, permission))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub flag_type: FlagType,
    pub value: FlagValue,
    pub inheritable: bool,
}

impl Flag {
    pub fn new(flag_type: FlagType, value: FlagValue, inheritable: bool) -> Self {
        Self {
            flag_type,
            value,
            inheritable,
        }
    }

    pub fn to_wire(&self) -> String {
        format!(
            "{}:{}:{}",
            self.flag_type,
            self.value.to_wire(),
            self.inheritable
        )
    }

    pub fn from_wire(value: &str) -> Result<Self, WireError> {
        let (flag_type, rest) = value.split_once(':').ok_or(WireError::FieldCount {
            expected: 3,
            got: 1,
            value: value.to_string(),
        })?;
        let (flag_value, inheritable) = rest.rsplit_once(':').ok_or(WireError::FieldCount {
            expected: 3,
            got: 2,
            value: value.to_string(),
        })?;
        if flag_type.trim().is_empty() {
            return Err(WireError::Empty);
        }
        Ok(Flag::new(
            FlagType::new(flag_type),
            FlagValue::from_wire(flag_value)?,
            wire::parse_bool(inheritable)?,
        ))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

/// Permission and flag tables of a land, or of a default pseudo-land
/// (outside, per-world, per-type).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandSettings {
    permissions: BTreeMap<PlayerContainer, BTreeMap<PermissionType, Permission>>,
    flags: BTreeMap<FlagType, Flag>,
}

impl LandSettings {
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty() && self.flags.is_empty()
    }

    pub fn add_permission(&mut self, container: PlayerContainer, permission: Permission) {
        self.permissions
            .entry(container)
            .or_default()
            .insert(permission.perm_type.clone(), permission);
    }

    /// Returns `true` if an entry was removed.
    pub fn remove_permission(
        &mut self,
        container: &PlayerContainer,
        perm_type: &PermissionType,
    ) -> bool {
        let Some(table) = self.permissions.get_mut(container) else {
            return false;
        };
        let removed = table.remove(perm_type).is_some();
        if table.is_empty() {
            self.permissions.remove(container);
        }
        removed
    }

    pub fn permissions(
        &self,
    ) -> impl Iterator<Item = (&PlayerContainer, &BTreeMap<PermissionType, Permission>)> {
        self.permissions.iter()
    }

    pub fn permissions_for(
        &self,
        container: &PlayerContainer,
    ) -> Option<&BTreeMap<PermissionType, Permission>> {
        self.permissions.get(container)
    }

    pub fn add_flag(&mut self, flag: Flag) {
        self.flags.insert(flag.flag_type.clone(), flag);
    }

    pub fn remove_flag(&mut self, flag_type: &FlagType) -> bool {
        self.flags.remove(flag_type).is_some()
    }

    pub fn flag(&self, flag_type: &FlagType) -> Option<&Flag> {
        self.flags.get(flag_type)
    }

    pub fn flags(&self) -> impl Iterator<Item = &Flag> {
        self.flags.values()
    }

    /// Every permission in wire format, ordered by container then type.
    pub fn permission_wires(&self) -> Vec<String> {
        self.permissions
            .iter()
            .flat_map(|(container, table)| table.values().map(|p| p.to_wire(container)))
            .collect()
    }

    pub fn flag_wires(&self) -> Vec<String> {
        self.flags.values().map(Flag::to_wire).collect()
    }

    pub fn from_wires(permissions: &[String], flags: &[String]) -> Result<Self, WireError> {
        let mut settings = LandSettings::default();
        for raw in permissions {
            let (container, permission) = Permission::from_wire(raw)?;
            settings.add_permission(container, permission);
        }
        for raw in flags {
            settings.add_flag(Flag::from_wire(raw)?);
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn flag_values_parse_by_shape() {
        assert_eq!(FlagValue::from_wire("true").unwrap(), FlagValue::Bool(true));
        assert_eq!(FlagValue::from_wire("2.5").unwrap(), FlagValue::Double(2.5));
        assert_eq!(
            FlagValue::from_wire("'hello: world'").unwrap(),
            FlagValue::Str("hello: world".to_string())
        );
        assert_eq!(
            FlagValue::from_wire("['/home','/spawn']").unwrap(),
            FlagValue::StrList(vec!["/home".to_string(), "/spawn".to_string()])
        );
        assert_eq!(
            FlagValue::from_wire("[]").unwrap(),
            FlagValue::StrList(Vec::new())
        );
        assert!(FlagValue::from_wire("maybe").is_err());
        assert!(FlagValue::from_wire("NaN").is_err());
    }

    #[test]
    fn double_keeps_decimal_point() {
        assert_eq!(FlagValue::Double(3.0).to_wire(), "3.0");
        assert_eq!(FlagValue::from_wire("3").unwrap().to_wire(), "3.0");
    }

    #[test]
    fn permission_wire_with_keyed_container() {
        let uuid = Uuid::from_u128(7);
        let raw = format!("PLAYER:{}:BUILD:false:true", uuid);
        let (container, permission) = Permission::from_wire(&raw).unwrap();
        assert_eq!(container, PlayerContainer::player(uuid));
        assert_eq!(permission.perm_type, PermissionType::BUILD);
        assert!(!permission.value);
        assert!(permission.inheritable);
        assert_eq!(permission.to_wire(&container), raw);
    }

    #[test]
    fn permission_wire_errors() {
        assert!(matches!(
            Permission::from_wire("BUILD:true"),
            Err(WireError::FieldCount { .. })
        ));
        assert!(matches!(
            Permission::from_wire("EVERYBODY:BUILD:yes:true"),
            Err(WireError::Bool(_))
        ));
    }

    #[test]
    fn flag_wire_with_colons_in_string() {
        let raw = "MESSAGE_JOIN:'Welcome: it''s home':false";
        let flag = Flag::from_wire(raw).unwrap();
        assert_eq!(flag.flag_type, FlagType::MESSAGE_JOIN);
        assert_eq!(flag.value, FlagValue::Str("Welcome: it's home".to_string()));
        assert!(!flag.inheritable);
        assert_eq!(flag.to_wire(), raw);
    }

    #[test]
    fn settings_reserialize_identically() {
        let uuid = Uuid::from_u128(99);
        let permissions = vec![
            "OWNER:BUILD:true:true".to_string(),
            format!("PLAYER:{}:OPEN_CHEST:false:false", uuid),
            "EVERYBODY:LAND_ENTER:false:true".to_string(),
        ];
        let flags = vec![
            "ECO_BLOCK_PRICE:1.5:true".to_string(),
            "EXCLUDE_COMMANDS:['/a','/b']:true".to_string(),
            "FIRESPREAD:false:true".to_string(),
        ];
        let settings = LandSettings::from_wires(&permissions, &flags).unwrap();
        let again = LandSettings::from_wires(
            &settings.permission_wires(),
            &settings.flag_wires(),
        )
        .unwrap();
        assert_eq!(again, settings);
        assert_eq!(again.permission_wires(), settings.permission_wires());
        assert_eq!(again.flag_wires(), settings.flag_wires());
    }

    #[test]
    fn removing_last_permission_drops_container() {
        let mut settings = LandSettings::default();
        settings.add_permission(
            PlayerContainer::Everybody,
            Permission::new(PermissionType::BUILD, false, true),
        );
        assert!(settings.remove_permission(&PlayerContainer::Everybody, &PermissionType::BUILD));
        assert!(settings.permissions_for(&PlayerContainer::Everybody).is_none());
        assert!(settings.is_empty());
    }
}
