use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use super::approve::ApproveList;
use super::events::{ChangeKind, LandChange};
use super::land::{Land, LandId, LandType, RentInfo, SaleInfo};
use super::resolve::{self, FlagLookup, PermissionLookup};
use crate::geometry::Area;
use crate::permissions::{
    Flag, FlagType, FlagValue, LandSettings, Permission, PermissionType, PermissionsRegistry,
};
use crate::players::{Player, PlayerContainer};

pub const DEFAULT_PRIORITY: i16 = 10;
pub const MIN_PRIORITY: i16 = 0;
pub const MAX_PRIORITY: i16 = 100;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LandsError {
    #[error("land name '{0}' is already in use")]
    NameInUse(String),
    #[error("invalid land name '{0}'")]
    InvalidName(String),
    #[error("land {0} not found")]
    LandNotFound(LandId),
    #[error("parent land {0} not found")]
    ParentNotFound(LandId),
    #[error("land uuid {0} already exists")]
    DuplicateUuid(LandId),
    #[error("'{0}' cannot own a land")]
    InvalidOwner(String),
    #[error("'{0}' is relative to a land and cannot be listed here")]
    RelativeContainer(String),
    #[error("infinite areas cannot belong to a land")]
    InfiniteArea,
    #[error("area is in world '{got}' but the land is in '{expected}'")]
    WorldMismatch { expected: String, got: String },
    #[error("area id {area_id} is not a free positive id in '{land}'")]
    AreaIdInUse { land: String, area_id: u32 },
    #[error("area {area_id} not found in '{land}'")]
    AreaNotFound { land: String, area_id: u32 },
    #[error("'{0}' must keep at least one area")]
    LastArea(String),
    #[error("'{0}' still has child lands")]
    HasChildren(String),
    #[error("'{land}' cannot be placed under '{parent}'")]
    ParentCycle { land: String, parent: String },
    #[error("priority {0} is outside 0..=100")]
    PriorityOutOfRange(i16),
    #[error("'{0}' is a child land and takes its priority from its root")]
    PriorityOnChild(String),
    #[error("flag {flag} does not accept the value {value}")]
    FlagValueKind { flag: String, value: String },
    #[error("'{0}' is not for rent")]
    NotForRent(String),
}

/// Parameters of [`Lands::create_land`].
#[derive(Debug, Clone)]
pub struct NewLand {
    pub name: String,
    pub owner: PlayerContainer,
    pub area: Area,
    pub parent: Option<LandId>,
    pub land_type: Option<LandType>,
    pub uuid: Option<LandId>,
    pub area_id: Option<u32>,
    pub priority: Option<i16>,
}

impl NewLand {
    pub fn new(name: &str, owner: PlayerContainer, area: Area) -> Self {
        Self {
            name: name.to_string(),
            owner,
            area,
            parent: None,
            land_type: None,
            uuid: None,
            area_id: None,
            priority: None,
        }
    }

    pub fn with_parent(mut self, parent: LandId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_type(mut self, land_type: LandType) -> Self {
        self.land_type = Some(land_type);
        self
    }

    pub fn with_uuid(mut self, uuid: LandId) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn with_area_id(mut self, area_id: u32) -> Self {
        self.area_id = Some(area_id);
        self
    }

    pub fn with_priority(mut self, priority: i16) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Entry of the per-world spatial list, sorted by `min_x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AreaEntry {
    min_x: i32,
    max_x: i32,
    land: LandId,
    area_id: u32,
}

/// Normalised land name: trimmed and lower-cased.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn check_priority(priority: i16) -> Result<(), LandsError> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err(LandsError::PriorityOutOfRange(priority))
    }
}

/// The land hierarchy index: owns every [`Land`] plus the by-name and
/// spatial lookups, the default settings tables and the approval queue.
#[derive(Debug)]
pub struct Lands {
    lands: HashMap<LandId, Land>,
    names: HashMap<String, LandId>,
    spatial: HashMap<String, Vec<AreaEntry>>,
    registry: PermissionsRegistry,
    outside: LandSettings,
    worlds: HashMap<String, LandSettings>,
    types: HashMap<LandType, LandSettings>,
    approvals: ApproveList,
    default_priority: i16,
    changes: broadcast::Sender<LandChange>,
}

impl Default for Lands {
    fn default() -> Self {
        Self::new(PermissionsRegistry::default())
    }
}

impl Lands {
    pub fn new(registry: PermissionsRegistry) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            lands: HashMap::new(),
            names: HashMap::new(),
            spatial: HashMap::new(),
            registry,
            outside: LandSettings::default(),
            worlds: HashMap::new(),
            types: HashMap::new(),
            approvals: ApproveList::default(),
            default_priority: DEFAULT_PRIORITY,
            changes,
        }
    }

    // ---- change notification ----

    pub fn subscribe(&self) -> broadcast::Receiver<LandChange> {
        self.changes.subscribe()
    }

    fn emit(&self, land: LandId, land_name: &str, kind: ChangeKind) {
        // No subscribers is not an error.
        let _ = self.changes.send(LandChange {
            land,
            land_name: land_name.to_string(),
            kind,
        });
    }

    // ---- configuration ----

    pub fn registry(&self) -> &PermissionsRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PermissionsRegistry {
        &mut self.registry
    }

    pub fn default_priority(&self) -> i16 {
        self.default_priority
    }

    pub fn set_default_priority(&mut self, priority: i16) -> Result<(), LandsError> {
        check_priority(priority)?;
        self.default_priority = priority;
        Ok(())
    }

    pub fn outside_defaults(&self) -> &LandSettings {
        &self.outside
    }

    pub fn set_outside_defaults(&mut self, settings: LandSettings) {
        self.outside = settings;
    }

    pub fn set_world_defaults(&mut self, world: &str, settings: LandSettings) {
        self.worlds.insert(world.to_string(), settings);
    }

    /// Settings for unclaimed space in `world`; the outside defaults when the
    /// world has no table of its own.
    pub fn world_defaults(&self, world: &str) -> &LandSettings {
        self.worlds.get(world).unwrap_or(&self.outside)
    }

    pub fn set_type_defaults(&mut self, land_type: LandType, settings: LandSettings) {
        self.types.insert(land_type, settings);
    }

    pub fn type_defaults(&self, land_type: &LandType) -> Option<&LandSettings> {
        self.types.get(land_type)
    }

    pub fn approvals(&self) -> &ApproveList {
        &self.approvals
    }

    pub fn approvals_mut(&mut self) -> &mut ApproveList {
        &mut self.approvals
    }

    // ---- queries ----

    pub fn len(&self) -> usize {
        self.lands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lands.is_empty()
    }

    pub fn get_land(&self, id: LandId) -> Option<&Land> {
        self.lands.get(&id)
    }

    pub fn get_land_by_name(&self, name: &str) -> Option<&Land> {
        self.names
            .get(&normalize_name(name))
            .and_then(|id| self.lands.get(id))
    }

    pub fn is_name_in_use(&self, name: &str) -> bool {
        self.names.contains_key(&normalize_name(name))
    }

    pub fn lands(&self) -> impl Iterator<Item = &Land> {
        self.lands.values()
    }

    /// Every land sorted by name.
    pub fn lands_sorted(&self) -> Vec<&Land> {
        let mut all: Vec<&Land> = self.lands.values().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn lands_in_world<'a>(&'a self, world: &'a str) -> impl Iterator<Item = &'a Land> + 'a {
        self.lands.values().filter(move |land| land.world == world)
    }

    pub fn lands_of_owner(&self, owner: &PlayerContainer) -> Vec<&Land> {
        self.lands.values().filter(|l| &l.owner == owner).collect()
    }

    pub fn lands_for_sale(&self) -> Vec<&Land> {
        self.lands.values().filter(|l| l.is_for_sale()).collect()
    }

    pub fn lands_for_rent(&self) -> Vec<&Land> {
        self.lands.values().filter(|l| l.is_for_rent()).collect()
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: LandId) -> Vec<LandId> {
        let mut chain = Vec::new();
        let mut current = self.lands.get(&id).and_then(|l| l.parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.lands.get(&parent).and_then(|l| l.parent);
        }
        chain
    }

    /// True iff `ancestor` appears in the parent chain of `id`.
    pub fn is_descendant(&self, id: LandId, ancestor: LandId) -> bool {
        let mut current = self.lands.get(&id).and_then(|l| l.parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.lands.get(&parent).and_then(|l| l.parent);
        }
        false
    }

    /// Every land below `id`, breadth first.
    pub fn descendants(&self, id: LandId) -> Vec<LandId> {
        let mut found = Vec::new();
        let mut queue: Vec<LandId> = self
            .lands
            .get(&id)
            .map(|l| l.children.iter().copied().collect())
            .unwrap_or_default();
        let mut next = 0;
        while next < queue.len() {
            let child = queue[next];
            next += 1;
            found.push(child);
            if let Some(land) = self.lands.get(&child) {
                queue.extend(land.children.iter().copied());
            }
        }
        found
    }

    /// A child's effective priority is always its root's.
    pub fn effective_priority(&self, id: LandId) -> i16 {
        let root = self.ancestors(id).last().copied().unwrap_or(id);
        self.lands
            .get(&root)
            .map_or(self.default_priority, |l| l.priority)
    }

    /// The land governing a block: highest effective priority, then the
    /// deepest land, then the lowest area id, then the land uuid.
    pub fn get_land_at(&self, world: &str, x: i32, y: i32, z: i32) -> Option<&Land> {
        self.get_lands_at(world, x, y, z).into_iter().next()
    }

    /// Every land claiming a block, in the order used by [`Lands::get_land_at`].
    pub fn get_lands_at(&self, world: &str, x: i32, y: i32, z: i32) -> Vec<&Land> {
        let Some(entries) = self.spatial.get(world) else {
            return Vec::new();
        };
        let end = entries.partition_point(|e| e.min_x <= x);
        let mut hits: BTreeMap<LandId, u32> = BTreeMap::new();
        for entry in &entries[..end] {
            if entry.max_x < x {
                continue;
            }
            let contains = self
                .lands
                .get(&entry.land)
                .and_then(|land| land.area(entry.area_id))
                .is_some_and(|area| area.contains_point(world, x, y, z));
            if contains {
                hits.entry(entry.land)
                    .and_modify(|id| *id = (*id).min(entry.area_id))
                    .or_insert(entry.area_id);
            }
        }

        let mut ranked: Vec<(&Land, i16, u32)> = hits
            .into_iter()
            .filter_map(|(id, area_id)| {
                self.lands
                    .get(&id)
                    .map(|land| (land, self.effective_priority(id), area_id))
            })
            .collect();
        ranked.sort_by_key(|(land, priority, area_id)| {
            (Reverse(*priority), Reverse(land.genealogy), *area_id, land.uuid)
        });
        ranked.into_iter().map(|(land, _, _)| land).collect()
    }

    pub fn check_permission_at(
        &self,
        world: &str,
        x: i32,
        y: i32,
        z: i32,
        player: &Player,
        perm_type: &PermissionType,
    ) -> bool {
        match self.get_land_at(world, x, y, z) {
            Some(land) => land.check_permission_and_inherit(player, perm_type, self),
            None => self.check_permission_outside(world, player, perm_type),
        }
    }

    pub fn flag_at(&self, world: &str, x: i32, y: i32, z: i32, flag_type: &FlagType) -> FlagValue {
        match self.get_land_at(world, x, y, z) {
            Some(land) => land.flag_and_inherit(flag_type, self),
            None => self.flag_outside(world, flag_type),
        }
    }

    pub fn check_permission_outside(
        &self,
        world: &str,
        player: &Player,
        perm_type: &PermissionType,
    ) -> bool {
        let lookup = PermissionLookup::new(player, perm_type, &self.registry);
        resolve::resolve_outside(world, &lookup, self)
    }

    pub fn flag_outside(&self, world: &str, flag_type: &FlagType) -> FlagValue {
        resolve::resolve_outside(world, &FlagLookup::new(flag_type), self)
    }

    // ---- spatial index ----

    fn index_area(&mut self, land: LandId, area_id: u32, area: &Area) {
        let (min, max) = area.bounding_box();
        let entries = self.spatial.entry(area.world().to_string()).or_default();
        let at = entries.partition_point(|e| e.min_x <= min.x);
        entries.insert(
            at,
            AreaEntry {
                min_x: min.x,
                max_x: max.x,
                land,
                area_id,
            },
        );
    }

    fn unindex_area(&mut self, land: LandId, area_id: u32, world: &str) {
        if let Some(entries) = self.spatial.get_mut(world) {
            entries.retain(|e| !(e.land == land && e.area_id == area_id));
            if entries.is_empty() {
                self.spatial.remove(world);
            }
        }
    }

    // ---- structural mutations ----

    fn land_ref(&self, id: LandId) -> Result<&Land, LandsError> {
        self.lands.get(&id).ok_or(LandsError::LandNotFound(id))
    }

    fn land_mut(&mut self, id: LandId) -> Result<&mut Land, LandsError> {
        self.lands.get_mut(&id).ok_or(LandsError::LandNotFound(id))
    }

    fn check_land_area(land: &Land, area: &Area) -> Result<(), LandsError> {
        if area.is_infinite() {
            return Err(LandsError::InfiniteArea);
        }
        if area.world() != land.world {
            return Err(LandsError::WorldMismatch {
                expected: land.world.clone(),
                got: area.world().to_string(),
            });
        }
        Ok(())
    }

    /// Insert a new land. This validates identity and hierarchy only; the
    /// geometric rules are the collision engine's job.
    pub fn create_land(&mut self, new: NewLand) -> Result<LandId, LandsError> {
        let name = normalize_name(&new.name);
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(LandsError::InvalidName(new.name));
        }
        if self.names.contains_key(&name) {
            return Err(LandsError::NameInUse(name));
        }
        if !new.owner.can_own_land() {
            return Err(LandsError::InvalidOwner(new.owner.to_wire()));
        }
        if new.area.is_infinite() {
            return Err(LandsError::InfiniteArea);
        }
        let uuid = new.uuid.unwrap_or_else(Uuid::new_v4);
        if self.lands.contains_key(&uuid) {
            return Err(LandsError::DuplicateUuid(uuid));
        }
        let area_id = new.area_id.unwrap_or(1);
        if area_id == 0 {
            return Err(LandsError::AreaIdInUse {
                land: name,
                area_id,
            });
        }
        let priority = new.priority.unwrap_or(self.default_priority);
        check_priority(priority)?;

        let world = new.area.world().to_string();
        let genealogy = match new.parent {
            Some(parent_id) => {
                let parent = self
                    .lands
                    .get(&parent_id)
                    .ok_or(LandsError::ParentNotFound(parent_id))?;
                if parent.world != world {
                    return Err(LandsError::WorldMismatch {
                        expected: parent.world.clone(),
                        got: world,
                    });
                }
                parent.genealogy + 1
            }
            None => 0,
        };

        let land = Land {
            uuid,
            name: name.clone(),
            world,
            land_type: new.land_type,
            areas: BTreeMap::from([(area_id, new.area.clone())]),
            parent: new.parent,
            children: BTreeSet::new(),
            genealogy,
            priority,
            owner: new.owner,
            residents: BTreeSet::new(),
            banned: BTreeSet::new(),
            settings: LandSettings::default(),
            money: 0.0,
            player_notify: BTreeSet::new(),
            sale: None,
            rent: None,
        };

        if let Some(parent) = new.parent.and_then(|p| self.lands.get_mut(&p)) {
            parent.children.insert(uuid);
        }
        self.index_area(uuid, area_id, &new.area);
        self.names.insert(name.clone(), uuid);
        self.lands.insert(uuid, land);

        info!(land = %name, uuid = %uuid, parent = ?new.parent, "land created");
        self.emit(uuid, &name, ChangeKind::Created);
        Ok(uuid)
    }

    /// Remove a land. A land with children is only removed when `cascade`
    /// is set, in which case the whole subtree goes with it. Returns the ids
    /// removed, deepest first.
    pub fn remove_land(&mut self, id: LandId, cascade: bool) -> Result<Vec<LandId>, LandsError> {
        let land = self.land_ref(id)?;
        if !land.children.is_empty() && !cascade {
            return Err(LandsError::HasChildren(land.name.clone()));
        }
        let mut order = self.descendants(id);
        order.reverse();
        order.push(id);
        for removed in &order {
            self.detach(*removed);
        }
        Ok(order)
    }

    fn detach(&mut self, id: LandId) {
        let Some(land) = self.lands.remove(&id) else {
            return;
        };
        if let Some(parent) = land.parent.and_then(|p| self.lands.get_mut(&p)) {
            parent.children.remove(&id);
        }
        for area_id in land.areas.keys() {
            self.unindex_area(id, *area_id, &land.world);
        }
        self.names.remove(&land.name);
        info!(land = %land.name, uuid = %id, "land removed");
        self.emit(id, &land.name, ChangeKind::Removed);
    }

    pub fn rename(&mut self, id: LandId, new_name: &str) -> Result<(), LandsError> {
        let name = normalize_name(new_name);
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(LandsError::InvalidName(new_name.to_string()));
        }
        let old_name = self.land_ref(id)?.name.clone();
        if old_name == name {
            return Ok(());
        }
        if self.names.contains_key(&name) {
            return Err(LandsError::NameInUse(name));
        }
        self.names.remove(&old_name);
        self.names.insert(name.clone(), id);
        self.land_mut(id)?.name = name.clone();
        info!(from = %old_name, to = %name, "land renamed");
        self.emit(id, &name, ChangeKind::Renamed { old_name });
        Ok(())
    }

    /// Add an area under the next free id.
    pub fn add_area(&mut self, id: LandId, area: Area) -> Result<u32, LandsError> {
        let area_id = self.land_ref(id)?.next_area_id();
        self.add_area_with_id(id, area_id, area)?;
        Ok(area_id)
    }

    pub fn add_area_with_id(&mut self, id: LandId, area_id: u32, area: Area) -> Result<(), LandsError> {
        let land = self.land_ref(id)?;
        Self::check_land_area(land, &area)?;
        if area_id == 0 || land.areas.contains_key(&area_id) {
            return Err(LandsError::AreaIdInUse {
                land: land.name.clone(),
                area_id,
            });
        }
        let name = land.name.clone();
        self.index_area(id, area_id, &area);
        self.land_mut(id)?.areas.insert(area_id, area);
        debug!(land = %name, area_id, "area added");
        self.emit(id, &name, ChangeKind::AreaAdded(area_id));
        Ok(())
    }

    /// Remove an area. The last area of a land cannot be removed; remove the
    /// land instead.
    pub fn remove_area(&mut self, id: LandId, area_id: u32) -> Result<Area, LandsError> {
        let land = self.land_ref(id)?;
        if !land.areas.contains_key(&area_id) {
            return Err(LandsError::AreaNotFound {
                land: land.name.clone(),
                area_id,
            });
        }
        if land.areas.len() == 1 {
            return Err(LandsError::LastArea(land.name.clone()));
        }
        let name = land.name.clone();
        let world = land.world.clone();
        self.unindex_area(id, area_id, &world);
        let removed = self
            .land_mut(id)?
            .areas
            .remove(&area_id)
            .ok_or(LandsError::AreaNotFound {
                land: name.clone(),
                area_id,
            })?;
        debug!(land = %name, area_id, "area removed");
        self.emit(id, &name, ChangeKind::AreaRemoved(area_id));
        Ok(removed)
    }

    /// Swap an existing area for a new one, returning the old area.
    pub fn replace_area(&mut self, id: LandId, area_id: u32, area: Area) -> Result<Area, LandsError> {
        let land = self.land_ref(id)?;
        Self::check_land_area(land, &area)?;
        if !land.areas.contains_key(&area_id) {
            return Err(LandsError::AreaNotFound {
                land: land.name.clone(),
                area_id,
            });
        }
        let name = land.name.clone();
        let world = land.world.clone();
        self.unindex_area(id, area_id, &world);
        self.index_area(id, area_id, &area);
        let old = self
            .land_mut(id)?
            .areas
            .insert(area_id, area)
            .ok_or(LandsError::AreaNotFound {
                land: name.clone(),
                area_id,
            })?;
        debug!(land = %name, area_id, "area modified");
        self.emit(id, &name, ChangeKind::AreaModified(area_id));
        Ok(old)
    }

    /// Move a land under `parent`, or make it a root with `None`.
    pub fn set_parent(&mut self, id: LandId, parent: Option<LandId>) -> Result<(), LandsError> {
        let land = self.land_ref(id)?;
        let name = land.name.clone();
        let world = land.world.clone();
        let old_parent = land.parent;

        if let Some(parent_id) = parent {
            let parent_land = self
                .lands
                .get(&parent_id)
                .ok_or(LandsError::ParentNotFound(parent_id))?;
            if parent_id == id || self.is_descendant(parent_id, id) {
                return Err(LandsError::ParentCycle {
                    land: name,
                    parent: parent_land.name.clone(),
                });
            }
            if parent_land.world != world {
                return Err(LandsError::WorldMismatch {
                    expected: world,
                    got: parent_land.world.clone(),
                });
            }
        }
        if old_parent == parent {
            return Ok(());
        }

        if let Some(old) = old_parent.and_then(|p| self.lands.get_mut(&p)) {
            old.children.remove(&id);
        }
        if let Some(new) = parent.and_then(|p| self.lands.get_mut(&p)) {
            new.children.insert(id);
        }
        self.land_mut(id)?.parent = parent;
        self.refresh_genealogy(id);

        info!(land = %name, parent = ?parent, "land parent changed");
        self.emit(id, &name, ChangeKind::ParentChanged);
        Ok(())
    }

    fn refresh_genealogy(&mut self, id: LandId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let depth = self
                .lands
                .get(&current)
                .and_then(|l| l.parent)
                .and_then(|p| self.lands.get(&p))
                .map_or(0, |p| p.genealogy + 1);
            if let Some(land) = self.lands.get_mut(&current) {
                land.genealogy = depth;
                stack.extend(land.children.iter().copied());
            }
        }
    }

    // ---- setters ----

    fn update<F>(&mut self, id: LandId, kind: ChangeKind, apply: F) -> Result<(), LandsError>
    where
        F: FnOnce(&mut Land),
    {
        let land = self.land_mut(id)?;
        apply(land);
        let name = land.name.clone();
        debug!(land = %name, change = ?kind, "land updated");
        self.emit(id, &name, kind);
        Ok(())
    }

    pub fn set_owner(&mut self, id: LandId, owner: PlayerContainer) -> Result<(), LandsError> {
        if !owner.can_own_land() {
            return Err(LandsError::InvalidOwner(owner.to_wire()));
        }
        self.update(id, ChangeKind::OwnerChanged, |land| land.owner = owner)
    }

    pub fn add_resident(&mut self, id: LandId, resident: PlayerContainer) -> Result<(), LandsError> {
        if !resident.is_absolute() {
            return Err(LandsError::RelativeContainer(resident.to_wire()));
        }
        self.update(id, ChangeKind::ResidentsChanged, |land| {
            land.residents.insert(resident);
        })
    }

    pub fn remove_resident(&mut self, id: LandId, resident: &PlayerContainer) -> Result<(), LandsError> {
        self.update(id, ChangeKind::ResidentsChanged, |land| {
            land.residents.remove(resident);
        })
    }

    pub fn add_banned(&mut self, id: LandId, banned: PlayerContainer) -> Result<(), LandsError> {
        if !banned.is_absolute() {
            return Err(LandsError::RelativeContainer(banned.to_wire()));
        }
        self.update(id, ChangeKind::BannedChanged, |land| {
            land.banned.insert(banned);
        })
    }

    pub fn remove_banned(&mut self, id: LandId, banned: &PlayerContainer) -> Result<(), LandsError> {
        self.update(id, ChangeKind::BannedChanged, |land| {
            land.banned.remove(banned);
        })
    }

    pub fn add_permission(
        &mut self,
        id: LandId,
        container: PlayerContainer,
        permission: Permission,
    ) -> Result<(), LandsError> {
        self.update(id, ChangeKind::PermissionsChanged, |land| {
            land.settings.add_permission(container, permission)
        })
    }

    pub fn remove_permission(
        &mut self,
        id: LandId,
        container: &PlayerContainer,
        perm_type: &PermissionType,
    ) -> Result<(), LandsError> {
        self.update(id, ChangeKind::PermissionsChanged, |land| {
            land.settings.remove_permission(container, perm_type);
        })
    }

    pub fn set_flag(&mut self, id: LandId, flag: Flag) -> Result<(), LandsError> {
        if !self.registry.accepts_flag_value(&flag.flag_type, &flag.value) {
            return Err(LandsError::FlagValueKind {
                flag: flag.flag_type.to_string(),
                value: flag.value.to_wire(),
            });
        }
        self.update(id, ChangeKind::FlagsChanged, |land| land.settings.add_flag(flag))
    }

    pub fn remove_flag(&mut self, id: LandId, flag_type: &FlagType) -> Result<(), LandsError> {
        self.update(id, ChangeKind::FlagsChanged, |land| {
            land.settings.remove_flag(flag_type);
        })
    }

    /// Copy every permission and flag of `from` onto `to`, overwriting
    /// entries present on both.
    pub fn copy_settings_to(&mut self, from: LandId, to: LandId) -> Result<(), LandsError> {
        let source = self.land_ref(from)?.settings.clone();
        self.land_ref(to)?;
        self.update(to, ChangeKind::PermissionsChanged, |land| {
            for (container, table) in source.permissions() {
                for permission in table.values() {
                    land.settings
                        .add_permission(container.clone(), permission.clone());
                }
            }
            for flag in source.flags() {
                land.settings.add_flag(flag.clone());
            }
        })
    }

    pub fn set_priority(&mut self, id: LandId, priority: i16) -> Result<(), LandsError> {
        check_priority(priority)?;
        let land = self.land_ref(id)?;
        if land.parent.is_some() {
            return Err(LandsError::PriorityOnChild(land.name.clone()));
        }
        self.update(id, ChangeKind::PriorityChanged, |land| land.priority = priority)
    }

    pub fn set_land_type(&mut self, id: LandId, land_type: Option<LandType>) -> Result<(), LandsError> {
        self.update(id, ChangeKind::TypeChanged, |land| land.land_type = land_type)
    }

    pub fn set_money(&mut self, id: LandId, money: f64) -> Result<(), LandsError> {
        self.update(id, ChangeKind::EconomyChanged, |land| land.money = money)
    }

    pub fn set_sale(&mut self, id: LandId, sale: Option<SaleInfo>) -> Result<(), LandsError> {
        self.update(id, ChangeKind::EconomyChanged, |land| land.sale = sale)
    }

    pub fn set_rent(&mut self, id: LandId, rent: Option<RentInfo>) -> Result<(), LandsError> {
        self.update(id, ChangeKind::EconomyChanged, |land| land.rent = rent)
    }

    /// Record a tenant (or clear it) together with the payment time.
    pub fn set_tenant(
        &mut self,
        id: LandId,
        tenant: Option<PlayerContainer>,
        paid_at: Option<u64>,
    ) -> Result<(), LandsError> {
        let land = self.land_ref(id)?;
        if land.rent.is_none() {
            return Err(LandsError::NotForRent(land.name.clone()));
        }
        if let Some(tenant) = &tenant {
            if !tenant.can_own_land() {
                return Err(LandsError::InvalidOwner(tenant.to_wire()));
            }
        }
        self.update(id, ChangeKind::EconomyChanged, |land| {
            if let Some(rent) = land.rent.as_mut() {
                rent.tenant = tenant;
                rent.last_payment = paid_at;
            }
        })
    }

    pub fn add_player_notify(&mut self, id: LandId, player: Uuid) -> Result<(), LandsError> {
        self.update(id, ChangeKind::NotifyChanged, |land| {
            land.player_notify.insert(player);
        })
    }

    pub fn remove_player_notify(&mut self, id: LandId, player: Uuid) -> Result<(), LandsError> {
        self.update(id, ChangeKind::NotifyChanged, |land| {
            land.player_notify.remove(&player);
        })
    }
}
