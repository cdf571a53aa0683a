//! Layered permission and flag lookup.
//!
//! Both kinds walk the same chain: the land's own table, its type
//! defaults, each ancestor (inheritable entries only), the world defaults
//! and finally the registry's hard default.

use super::index::Lands;
use super::land::Land;
use crate::permissions::{FlagType, FlagValue, LandSettings, PermissionType, PermissionsRegistry};
use crate::players::Player;

pub(crate) trait Lookup {
    type Value;

    /// Look for an entry in one settings table. `subject` is the land the
    /// land-relative containers are checked against.
    fn lookup(
        &self,
        settings: &LandSettings,
        subject: Option<&Land>,
        only_inherit: bool,
        lands: &Lands,
    ) -> Option<Self::Value>;

    fn hard_default(&self, registry: &PermissionsRegistry) -> Self::Value;
}

pub(crate) struct PermissionLookup<'a> {
    player: &'a Player,
    perm_type: &'a PermissionType,
    parent_type: Option<&'a PermissionType>,
}

impl<'a> PermissionLookup<'a> {
    pub(crate) fn new(
        player: &'a Player,
        perm_type: &'a PermissionType,
        registry: &'a PermissionsRegistry,
    ) -> Self {
        Self {
            player,
            perm_type,
            parent_type: registry.permission_parent(perm_type),
        }
    }
}

impl Lookup for PermissionLookup<'_> {
    type Value = bool;

    fn lookup(
        &self,
        settings: &LandSettings,
        subject: Option<&Land>,
        only_inherit: bool,
        lands: &Lands,
    ) -> Option<bool> {
        for (container, table) in settings.permissions() {
            if !container.has_access(self.player, subject, lands) {
                continue;
            }
            let permission = table
                .get(self.perm_type)
                .or_else(|| self.parent_type.and_then(|parent| table.get(parent)));
            if let Some(permission) = permission {
                if !only_inherit || permission.inheritable {
                    return Some(permission.value);
                }
            }
        }
        None
    }

    fn hard_default(&self, registry: &PermissionsRegistry) -> bool {
        registry.permission_default(self.perm_type)
    }
}

pub(crate) struct FlagLookup<'a> {
    flag_type: &'a FlagType,
}

impl<'a> FlagLookup<'a> {
    pub(crate) fn new(flag_type: &'a FlagType) -> Self {
        Self { flag_type }
    }
}

impl Lookup for FlagLookup<'_> {
    type Value = FlagValue;

    fn lookup(
        &self,
        settings: &LandSettings,
        _subject: Option<&Land>,
        only_inherit: bool,
        _lands: &Lands,
    ) -> Option<FlagValue> {
        settings
            .flag(self.flag_type)
            .filter(|flag| !only_inherit || flag.inheritable)
            .map(|flag| flag.value.clone())
    }

    fn hard_default(&self, registry: &PermissionsRegistry) -> FlagValue {
        registry.flag_default(self.flag_type)
    }
}

/// Resolve a value for `land`. Without `inherit` only the land's own table
/// and its type defaults are consulted.
///
/// Type defaults follow the same inheritance cutoff as the level being
/// visited: at the starting land any entry applies, at an ancestor only
/// inheritable ones. Parents are acyclic, so the walk ends after at most
/// genealogy + 2 tables.
pub(crate) fn resolve<L: Lookup>(land: &Land, lookup: &L, lands: &Lands, inherit: bool) -> L::Value {
    let mut current = land;
    let mut only_inherit = false;

    loop {
        if let Some(value) = lookup.lookup(current.settings(), Some(current), only_inherit, lands) {
            return value;
        }
        if let Some(defaults) = current.land_type().and_then(|t| lands.type_defaults(t)) {
            if let Some(value) = lookup.lookup(defaults, Some(current), only_inherit, lands) {
                return value;
            }
        }
        if !inherit {
            return lookup.hard_default(lands.registry());
        }
        match current.parent().and_then(|id| lands.get_land(id)) {
            Some(parent) => {
                current = parent;
                only_inherit = true;
            }
            None => break,
        }
    }

    lookup
        .lookup(lands.world_defaults(land.world()), Some(land), true, lands)
        .unwrap_or_else(|| lookup.hard_default(lands.registry()))
}

/// Resolve a value for a point no land claims: the world defaults, then
/// the hard default.
pub(crate) fn resolve_outside<L: Lookup>(world: &str, lookup: &L, lands: &Lands) -> L::Value {
    lookup
        .lookup(lands.world_defaults(world), None, false, lands)
        .unwrap_or_else(|| lookup.hard_default(lands.registry()))
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::geometry::Area;
    use crate::lands::{LandId, LandType, Lands, NewLand};
    use crate::permissions::{Flag, FlagType, FlagValue, LandSettings, Permission, PermissionType};
    use crate::players::{Player, PlayerContainer};

    struct Chain {
        lands: Lands,
        root: LandId,
        mid: LandId,
        leaf: LandId,
        alice: Player,
    }

    fn chain() -> Chain {
        let alice = Player::new(Uuid::from_u128(10), "alice");
        let owner = PlayerContainer::player(alice.uuid);
        let mut lands = Lands::default();
        let area = |x: i32| Area::cuboid("world", 0, 0, 0, x, 255, x).unwrap();
        let root = lands.create_land(NewLand::new("root", owner.clone(), area(100))).unwrap();
        let mid = lands
            .create_land(NewLand::new("mid", owner.clone(), area(50)).with_parent(root))
            .unwrap();
        let leaf = lands
            .create_land(NewLand::new("leaf", owner, area(10)).with_parent(mid))
            .unwrap();
        Chain {
            lands,
            root,
            mid,
            leaf,
            alice,
        }
    }

    fn everybody_build(value: bool, inheritable: bool) -> Permission {
        Permission::new(PermissionType::BUILD, value, inheritable)
    }

    fn build(c: &Chain, id: LandId) -> bool {
        c.lands
            .get_land(id)
            .unwrap()
            .check_permission_and_inherit(&c.alice, &PermissionType::BUILD, &c.lands)
    }

    #[test]
    fn nearest_level_wins_along_the_chain() {
        let mut c = chain();
        assert!(build(&c, c.leaf), "hard default");

        let mut world = LandSettings::default();
        world.add_permission(PlayerContainer::Everybody, everybody_build(false, true));
        c.lands.set_world_defaults("world", world);
        assert!(!build(&c, c.leaf), "world default");

        c.lands
            .add_permission(c.root, PlayerContainer::Everybody, everybody_build(true, true))
            .unwrap();
        assert!(build(&c, c.leaf), "root beats world");

        c.lands
            .add_permission(c.mid, PlayerContainer::Everybody, everybody_build(false, true))
            .unwrap();
        assert!(!build(&c, c.leaf), "mid beats root");

        let plot = LandType::new("plot");
        let mut type_defaults = LandSettings::default();
        type_defaults.add_permission(PlayerContainer::Everybody, everybody_build(true, true));
        c.lands.set_type_defaults(plot.clone(), type_defaults);
        c.lands.set_land_type(c.leaf, Some(plot)).unwrap();
        assert!(build(&c, c.leaf), "type default beats parent");

        c.lands
            .add_permission(c.leaf, PlayerContainer::Everybody, everybody_build(false, false))
            .unwrap();
        assert!(!build(&c, c.leaf), "own table beats type default");
    }

    #[test]
    fn non_inheritable_entries_stop_at_their_land() {
        let mut c = chain();
        c.lands
            .add_permission(c.root, PlayerContainer::Everybody, everybody_build(false, true))
            .unwrap();
        c.lands
            .add_permission(c.mid, PlayerContainer::Everybody, everybody_build(true, false))
            .unwrap();
        assert!(build(&c, c.mid));
        assert!(!build(&c, c.leaf));
    }

    #[test]
    fn parent_permission_type_is_a_fallback() {
        let mut c = chain();
        c.lands
            .add_permission(c.leaf, PlayerContainer::Owner, everybody_build(false, true))
            .unwrap();
        let leaf = c.lands.get_land(c.leaf).unwrap();
        assert!(!leaf.check_permission_and_inherit(&c.alice, &PermissionType::BUILD_PLACE, &c.lands));
        assert!(leaf.check_permission_and_inherit(&c.alice, &PermissionType::OPEN_CHEST, &c.lands));
    }

    #[test]
    fn no_inherit_ignores_parents_and_world() {
        let mut c = chain();
        c.lands
            .add_permission(c.root, PlayerContainer::Everybody, everybody_build(false, true))
            .unwrap();
        let mut world = LandSettings::default();
        world.add_flag(Flag::new(FlagType::FIRESPREAD, FlagValue::Bool(false), true));
        c.lands.set_world_defaults("world", world);

        let leaf = c.lands.get_land(c.leaf).unwrap();
        assert!(!leaf.check_permission_and_inherit(&c.alice, &PermissionType::BUILD, &c.lands));
        assert!(leaf.check_permission_no_inherit(&c.alice, &PermissionType::BUILD, &c.lands));
        assert_eq!(
            leaf.flag_and_inherit(&FlagType::FIRESPREAD, &c.lands),
            FlagValue::Bool(false)
        );
        assert_eq!(
            leaf.flag_no_inherit(&FlagType::FIRESPREAD, &c.lands),
            FlagValue::Bool(true)
        );
    }

    #[test]
    fn flags_follow_the_same_chain() {
        let mut c = chain();
        c.lands
            .set_flag(c.root, Flag::new(FlagType::ECO_BLOCK_PRICE, FlagValue::Double(2.0), true))
            .unwrap();
        c.lands
            .set_flag(c.mid, Flag::new(FlagType::ECO_BLOCK_PRICE, FlagValue::Double(5.0), false))
            .unwrap();
        let leaf = c.lands.get_land(c.leaf).unwrap();
        assert_eq!(
            leaf.flag_and_inherit(&FlagType::ECO_BLOCK_PRICE, &c.lands),
            FlagValue::Double(2.0)
        );
        assert_eq!(
            leaf.flag_and_inherit(&FlagType::new("UNKNOWN_FLAG"), &c.lands),
            FlagValue::Bool(false)
        );
    }

    #[test]
    fn ownership_inherits_through_flag() {
        let mut c = chain();
        c.lands.set_owner(c.leaf, PlayerContainer::Nobody).unwrap();
        let leaf = c.lands.get_land(c.leaf).unwrap();
        assert!(leaf.is_owner(&c.alice, &c.lands));

        c.lands
            .set_flag(c.leaf, Flag::new(FlagType::INHERIT_OWNER, FlagValue::Bool(false), false))
            .unwrap();
        let leaf = c.lands.get_land(c.leaf).unwrap();
        assert!(!leaf.is_owner(&c.alice, &c.lands));
    }

    #[test]
    fn points_outside_use_world_defaults() {
        let mut c = chain();
        let bob = Player::new(Uuid::from_u128(11), "bob");
        let mut outside = LandSettings::default();
        outside.add_permission(
            PlayerContainer::Everybody,
            Permission::new(PermissionType::BUILD, false, true),
        );
        c.lands.set_outside_defaults(outside);

        assert!(!c
            .lands
            .check_permission_at("world", 500, 64, 500, &bob, &PermissionType::BUILD));
        assert!(!c
            .lands
            .check_permission_at("nether", 0, 64, 0, &bob, &PermissionType::BUILD));
        // Inside the leaf, the outside table is the last resort as well.
        assert!(!c
            .lands
            .check_permission_at("world", 5, 64, 5, &bob, &PermissionType::BUILD));
        c.lands
            .add_permission(c.leaf, PlayerContainer::Visitor, everybody_build(true, true))
            .unwrap();
        assert!(c
            .lands
            .check_permission_at("world", 5, 64, 5, &bob, &PermissionType::BUILD));
    }
}
