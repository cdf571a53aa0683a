use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::index::Lands;
use super::resolve::{self, FlagLookup, PermissionLookup};
use crate::geometry::{Area, BlockPos};
use crate::permissions::{FlagType, FlagValue, LandSettings, PermissionType};
use crate::players::{Player, PlayerContainer};

pub type LandId = Uuid;

/// Land category selecting a set of type-level default settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LandType(String);

impl LandType {
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignLocation {
    pub world: String,
    pub pos: BlockPos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleInfo {
    pub price: f64,
    pub sign: Option<SignLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentInfo {
    pub price: f64,
    pub renew_days: u32,
    pub auto_renew: bool,
    pub tenant: Option<PlayerContainer>,
    /// Unix seconds of the last rent payment.
    pub last_payment: Option<u64>,
    pub sign: Option<SignLocation>,
}

impl RentInfo {
    pub fn is_rented(&self) -> bool {
        self.tenant.is_some()
    }
}

/// A claim. Lands are created and mutated only through [`Lands`], which
/// keeps the name and spatial indexes and the parent/child links in sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Land {
    pub(crate) uuid: LandId,
    pub(crate) name: String,
    pub(crate) world: String,
    pub(crate) land_type: Option<LandType>,
    pub(crate) areas: BTreeMap<u32, Area>,
    pub(crate) parent: Option<LandId>,
    pub(crate) children: BTreeSet<LandId>,
    pub(crate) genealogy: u32,
    pub(crate) priority: i16,
    pub(crate) owner: PlayerContainer,
    pub(crate) residents: BTreeSet<PlayerContainer>,
    pub(crate) banned: BTreeSet<PlayerContainer>,
    pub(crate) settings: LandSettings,
    pub(crate) money: f64,
    pub(crate) player_notify: BTreeSet<Uuid>,
    pub(crate) sale: Option<SaleInfo>,
    pub(crate) rent: Option<RentInfo>,
}

impl Land {
    pub fn uuid(&self) -> LandId {
        self.uuid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn world(&self) -> &str {
        &self.world
    }

    pub fn land_type(&self) -> Option<&LandType> {
        self.land_type.as_ref()
    }

    pub fn areas(&self) -> &BTreeMap<u32, Area> {
        &self.areas
    }

    pub fn area(&self, area_id: u32) -> Option<&Area> {
        self.areas.get(&area_id)
    }

    /// Area ids start at 1 and are never reused while higher ids exist.
    pub fn next_area_id(&self) -> u32 {
        self.areas.keys().next_back().map_or(1, |id| id + 1)
    }

    /// Total number of blocks across all areas.
    pub fn volume(&self) -> u64 {
        self.areas.values().filter_map(Area::volume).sum()
    }

    pub fn parent(&self) -> Option<LandId> {
        self.parent
    }

    pub fn children(&self) -> &BTreeSet<LandId> {
        &self.children
    }

    /// Depth in the hierarchy, 0 for a root.
    pub fn genealogy(&self) -> u32 {
        self.genealogy
    }

    /// The priority stored on this land. Only a root's value is effective;
    /// see [`Lands::effective_priority`].
    pub fn priority(&self) -> i16 {
        self.priority
    }

    pub fn owner(&self) -> &PlayerContainer {
        &self.owner
    }

    pub fn residents(&self) -> &BTreeSet<PlayerContainer> {
        &self.residents
    }

    pub fn banned(&self) -> &BTreeSet<PlayerContainer> {
        &self.banned
    }

    pub fn settings(&self) -> &LandSettings {
        &self.settings
    }

    pub fn money(&self) -> f64 {
        self.money
    }

    pub fn player_notify(&self) -> &BTreeSet<Uuid> {
        &self.player_notify
    }

    pub fn sale(&self) -> Option<&SaleInfo> {
        self.sale.as_ref()
    }

    pub fn rent(&self) -> Option<&RentInfo> {
        self.rent.as_ref()
    }

    pub fn is_for_sale(&self) -> bool {
        self.sale.is_some()
    }

    pub fn is_for_rent(&self) -> bool {
        self.rent.is_some()
    }

    pub fn is_rented(&self) -> bool {
        self.rent.as_ref().is_some_and(RentInfo::is_rented)
    }

    pub fn contains_point(&self, world: &str, x: i32, y: i32, z: i32) -> bool {
        self.areas
            .values()
            .any(|area| area.contains_point(world, x, y, z))
    }

    fn parent_land<'a>(&self, lands: &'a Lands) -> Option<&'a Land> {
        self.parent.and_then(|id| lands.get_land(id))
    }

    fn inherits(&self, flag: &FlagType, lands: &Lands) -> bool {
        self.flag_and_inherit(flag, lands).as_bool() == Some(true)
    }

    /// The owner container matches, or the land inherits its parent's owner
    /// through `INHERIT_OWNER` and the player owns the parent.
    pub fn is_owner(&self, player: &Player, lands: &Lands) -> bool {
        if self.owner.has_access(player, None, lands) {
            return true;
        }
        match self.parent_land(lands) {
            Some(parent) if self.inherits(&FlagType::INHERIT_OWNER, lands) => {
                parent.is_owner(player, lands)
            }
            _ => false,
        }
    }

    pub fn is_resident(&self, player: &Player, lands: &Lands) -> bool {
        if self
            .residents
            .iter()
            .any(|resident| resident.has_access(player, None, lands))
        {
            return true;
        }
        match self.parent_land(lands) {
            Some(parent) if self.inherits(&FlagType::INHERIT_RESIDENTS, lands) => {
                parent.is_resident(player, lands)
            }
            _ => false,
        }
    }

    pub fn is_tenant(&self, player: &Player, lands: &Lands) -> bool {
        let tenant = self.rent.as_ref().and_then(|rent| rent.tenant.as_ref());
        if tenant.is_some_and(|tenant| tenant.has_access(player, None, lands)) {
            return true;
        }
        match self.parent_land(lands) {
            Some(parent) if self.inherits(&FlagType::INHERIT_TENANT, lands) => {
                parent.is_tenant(player, lands)
            }
            _ => false,
        }
    }

    pub fn is_banned(&self, player: &Player, lands: &Lands) -> bool {
        self.banned
            .iter()
            .any(|banned| banned.has_access(player, None, lands))
    }

    /// Full layered resolution: this land, its type defaults, the ancestors
    /// (inheritable entries only), the world defaults, then the hard default.
    pub fn check_permission_and_inherit(
        &self,
        player: &Player,
        perm_type: &PermissionType,
        lands: &Lands,
    ) -> bool {
        let lookup = PermissionLookup::new(player, perm_type, lands.registry());
        resolve::resolve(self, &lookup, lands, true)
    }

    /// This land and its type defaults only, then the hard default.
    pub fn check_permission_no_inherit(
        &self,
        player: &Player,
        perm_type: &PermissionType,
        lands: &Lands,
    ) -> bool {
        let lookup = PermissionLookup::new(player, perm_type, lands.registry());
        resolve::resolve(self, &lookup, lands, false)
    }

    pub fn flag_and_inherit(&self, flag_type: &FlagType, lands: &Lands) -> FlagValue {
        resolve::resolve(self, &FlagLookup::new(flag_type), lands, true)
    }

    pub fn flag_no_inherit(&self, flag_type: &FlagType, lands: &Lands) -> FlagValue {
        resolve::resolve(self, &FlagLookup::new(flag_type), lands, false)
    }
}

impl fmt::Display for Land {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uuid)
    }
}
