//! Player identities and the containers used to grant ownership,
//! residency, bans and permissions.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lands::{Land, Lands};
use crate::wire::WireError;

/// An online player as seen by an access check. The host fills in the
/// groups and permission nodes from its own session data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub uuid: Uuid,
    pub name: String,
    pub groups: BTreeSet<String>,
    pub permission_nodes: BTreeSet<String>,
}

impl Player {
    pub fn new(uuid: Uuid, name: &str) -> Self {
        Self {
            uuid,
            name: name.to_string(),
            groups: BTreeSet::new(),
            permission_nodes: BTreeSet::new(),
        }
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.insert(group.to_lowercase());
        self
    }

    pub fn with_permission_node(mut self, node: &str) -> Self {
        self.permission_nodes.insert(node.to_string());
        self
    }
}

/// "Who" a setting applies to.
///
/// The derived ordering sorts by variant first and key second, which keeps
/// persisted tables and sets in a stable order. `Owner`, `Resident`,
/// `Tenant` and `Visitor` are relative: they are resolved against the land
/// passed to [`PlayerContainer::has_access`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlayerContainer {
    Owner,
    Resident,
    Tenant,
    Visitor,
    Player(Uuid),
    Group(String),
    Permission(String),
    Everybody,
    Nobody,
}

impl PlayerContainer {
    pub fn player(uuid: Uuid) -> Self {
        PlayerContainer::Player(uuid)
    }

    pub fn group(name: &str) -> Self {
        PlayerContainer::Group(name.to_lowercase())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PlayerContainer::Owner => "OWNER",
            PlayerContainer::Resident => "RESIDENT",
            PlayerContainer::Tenant => "TENANT",
            PlayerContainer::Visitor => "VISITOR",
            PlayerContainer::Player(_) => "PLAYER",
            PlayerContainer::Group(_) => "GROUP",
            PlayerContainer::Permission(_) => "PERMISSION",
            PlayerContainer::Everybody => "EVERYBODY",
            PlayerContainer::Nobody => "NOBODY",
        }
    }

    /// Containers that do not depend on a land. Only these can own one.
    pub fn is_absolute(&self) -> bool {
        !matches!(
            self,
            PlayerContainer::Owner
                | PlayerContainer::Resident
                | PlayerContainer::Tenant
                | PlayerContainer::Visitor
        )
    }

    pub fn can_own_land(&self) -> bool {
        matches!(
            self,
            PlayerContainer::Player(_) | PlayerContainer::Group(_) | PlayerContainer::Nobody
        )
    }

    /// Does `player` belong to this container? `context` is the land the
    /// relative variants are evaluated against; without one they never match.
    pub fn has_access(&self, player: &Player, context: Option<&Land>, lands: &Lands) -> bool {
        match self {
            PlayerContainer::Player(uuid) => player.uuid == *uuid,
            PlayerContainer::Group(name) => player.groups.contains(name),
            PlayerContainer::Permission(node) => player.permission_nodes.contains(node),
            PlayerContainer::Everybody => true,
            PlayerContainer::Nobody => false,
            PlayerContainer::Owner => context.is_some_and(|land| land.is_owner(player, lands)),
            PlayerContainer::Resident => {
                context.is_some_and(|land| land.is_resident(player, lands))
            }
            PlayerContainer::Tenant => context.is_some_and(|land| land.is_tenant(player, lands)),
            PlayerContainer::Visitor => context.is_some_and(|land| {
                !land.is_owner(player, lands)
                    && !land.is_resident(player, lands)
                    && !land.is_tenant(player, lands)
            }),
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            PlayerContainer::Player(uuid) => format!("PLAYER:{}", uuid),
            PlayerContainer::Group(name) => format!("GROUP:{}", name),
            PlayerContainer::Permission(node) => format!("PERMISSION:{}", node),
            other => other.kind_name().to_string(),
        }
    }

    pub fn from_wire(value: &str) -> Result<Self, WireError> {
        let (kind, key) = match value.split_once(':') {
            Some((kind, key)) => (kind, Some(key)),
            None => (value, None),
        };
        let keyed = |key: Option<&str>| -> Result<String, WireError> {
            match key {
                Some(k) if !k.is_empty() => Ok(k.to_string()),
                _ => Err(WireError::FieldCount {
                    expected: 2,
                    got: 1,
                    value: value.to_string(),
                }),
            }
        };
        let container = match kind.to_uppercase().as_str() {
            "" => return Err(WireError::Empty),
            "PLAYER" => {
                let raw = keyed(key)?;
                let uuid = Uuid::parse_str(&raw).map_err(|_| WireError::Uuid(raw.clone()))?;
                PlayerContainer::Player(uuid)
            }
            "GROUP" => PlayerContainer::group(&keyed(key)?),
            "PERMISSION" => PlayerContainer::Permission(keyed(key)?),
            simple => {
                let container = match simple {
                    "OWNER" => PlayerContainer::Owner,
                    "RESIDENT" => PlayerContainer::Resident,
                    "TENANT" => PlayerContainer::Tenant,
                    "VISITOR" => PlayerContainer::Visitor,
                    "EVERYBODY" => PlayerContainer::Everybody,
                    "NOBODY" => PlayerContainer::Nobody,
                    _ => {
                        return Err(WireError::UnknownKind {
                            kind: "player container",
                            value: kind.to_string(),
                        });
                    }
                };
                if key.is_some() {
                    return Err(WireError::FieldCount {
                        expected: 1,
                        got: 2,
                        value: value.to_string(),
                    });
                }
                container
            }
        };
        Ok(container)
    }
}

impl fmt::Display for PlayerContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}
