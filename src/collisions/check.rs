use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{
    CollisionReport, CollisionRequest, CollisionsEntry, CollisionsError, JobProgress, JobState,
    LandAction, LandError,
};
use crate::economy::EconomyProvider;
use crate::geometry::Area;
use crate::lands::{Land, LandId, Lands};
use crate::permissions::FlagType;

/// A single-shot collision check. Construct one per request; `run` may
/// only be called once.
#[derive(Debug)]
pub struct Collisions {
    request: CollisionRequest,
    state: JobState,
    progress: Option<watch::Sender<JobProgress>>,
}

/// The request resolved against the index.
struct Target<'a> {
    existing: Option<&'a Land>,
    parent: Option<&'a Land>,
    area: Option<&'a Area>,
    area_id: Option<u32>,
    world: &'a str,
}

impl Collisions {
    pub fn new(request: CollisionRequest) -> Self {
        Self {
            request,
            state: JobState::Created,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: watch::Sender<JobProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn request(&self) -> &CollisionRequest {
        &self.request
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn set_state(&mut self, state: JobState, percent: u8) {
        self.state = state;
        if let Some(tx) = &self.progress {
            tx.send_replace(JobProgress { state, percent });
        }
    }

    fn report_progress(&self, done: usize, total: usize) {
        let Some(tx) = &self.progress else {
            return;
        };
        let percent = (done * 100 / total.max(1)).min(99) as u8;
        tx.send_if_modified(|progress| {
            if percent > progress.percent {
                progress.percent = percent;
                true
            } else {
                false
            }
        });
    }

    /// Run every check against `lands` and collect all problems found.
    pub fn run(
        &mut self,
        lands: &Lands,
        economy: &dyn EconomyProvider,
    ) -> Result<CollisionReport, CollisionsError> {
        if self.state != JobState::Created {
            return Err(CollisionsError::AlreadyChecked);
        }
        self.set_state(JobState::Checking, 0);
        debug!(
            land = %self.request.land_name,
            action = ?self.request.action,
            "collision check started"
        );
        let result = self.check(lands, economy);
        self.set_state(JobState::Done, 100);

        if let Ok(report) = &result {
            info!(
                land = %self.request.land_name,
                action = ?self.request.action,
                entries = report.entries.len(),
                price = report.price,
                "collision check finished"
            );
        }
        result
    }

    fn resolve<'a>(&'a self, lands: &'a Lands) -> Result<Target<'a>, CollisionsError> {
        let request = &self.request;
        let action = request.action;

        let existing = match request.existing {
            Some(id) => Some(
                lands
                    .get_land(id)
                    .ok_or(CollisionsError::LandNotFound(id))?,
            ),
            None if action != LandAction::LandAdd => {
                return Err(CollisionsError::MissingLand(action));
            }
            None => None,
        };
        if action == LandAction::LandAdd && request.owner.is_none() {
            return Err(CollisionsError::MissingOwner);
        }

        let area = if action.needs_area() {
            Some(
                request
                    .area
                    .as_ref()
                    .ok_or(CollisionsError::MissingArea(action))?,
            )
        } else {
            None
        };

        let area_id = if action.needs_area_id() {
            let id = request
                .area_id
                .ok_or(CollisionsError::MissingAreaId(action))?;
            if let Some(land) = existing {
                if land.area(id).is_none() {
                    return Err(CollisionsError::AreaNotFound {
                        land: land.name().to_string(),
                        area_id: id,
                    });
                }
            }
            Some(id)
        } else {
            None
        };

        let parent_id = match action {
            LandAction::LandAdd | LandAction::LandParent => request.parent,
            _ => existing.and_then(Land::parent),
        };
        let parent = match parent_id {
            Some(id) => Some(
                lands
                    .get_land(id)
                    .ok_or(CollisionsError::ParentNotFound(id))?,
            ),
            None => None,
        };

        let world = existing
            .or(parent)
            .map(Land::world)
            .unwrap_or(request.world.as_str());

        Ok(Target {
            existing,
            parent,
            area,
            area_id,
            world,
        })
    }

    fn check(
        &self,
        lands: &Lands,
        economy: &dyn EconomyProvider,
    ) -> Result<CollisionReport, CollisionsError> {
        let target = self.resolve(lands)?;
        let request = &self.request;
        let action = request.action;
        let mut entries = Vec::new();

        if let Some(area) = target.area {
            if area.is_infinite() || area.world() != target.world {
                entries.push(CollisionsEntry::new(LandError::GeometryInvalid));
            }
        }

        if action == LandAction::LandAdd {
            if let Some(other) = lands.get_land_by_name(&request.land_name) {
                entries.push(CollisionsEntry::with_land(LandError::NameInUse, other));
            }
        }
        // One pending request per land name.
        if lands.approvals().is_in_approve(&request.land_name) {
            entries.push(CollisionsEntry::new(LandError::InApprove));
        }

        if let (LandAction::AreaRemove, Some(land)) = (action, target.existing) {
            if land.areas().len() <= 1 {
                entries.push(CollisionsEntry::with_land(
                    LandError::MustHaveAtLeastOneArea,
                    land,
                ));
            }
        }

        if let (LandAction::LandRemove, Some(land)) = (action, target.existing) {
            for child in land.children().iter().filter_map(|id| lands.get_land(*id)) {
                entries.push(CollisionsEntry::with_land(LandError::HasChildren, child));
            }
        }

        let cycle = match (action, target.existing, target.parent) {
            (LandAction::LandParent, Some(land), Some(parent)) => {
                parent.uuid() == land.uuid() || lands.is_descendant(parent.uuid(), land.uuid())
            }
            _ => false,
        };
        if let (true, Some(parent)) = (cycle, target.parent) {
            entries.push(CollisionsEntry::with_land(LandError::ParentCycle, parent));
        }

        let probes = self.probes(&target, cycle);

        if let Some(parent) = target.parent {
            let checks_parent = matches!(
                action,
                LandAction::LandAdd
                    | LandAction::AreaAdd
                    | LandAction::AreaModify
                    | LandAction::LandParent
            );
            if checks_parent && !cycle {
                for (area_id, area) in &probes {
                    let inside = parent.areas().values().any(|p| p.contains_area(area));
                    if !inside {
                        let mut entry = CollisionsEntry::with_land(LandError::OutOfParent, parent);
                        entry.area_id = *area_id;
                        entries.push(entry);
                    }
                }
            }
        }

        if matches!(action, LandAction::AreaModify | LandAction::AreaRemove) {
            if let Some(land) = target.existing {
                let resulting = self.resulting_areas(land, &target);
                for child in land.children().iter().filter_map(|id| lands.get_land(*id)) {
                    let outside = child
                        .areas()
                        .values()
                        .any(|c| !resulting.values().any(|r| r.contains_area(c)));
                    if outside {
                        entries.push(CollisionsEntry::with_land(LandError::ChildOutOfBorder, child));
                    }
                }
            }
        }

        if !probes.is_empty() {
            let exempt = exempt_lands(lands, &target);
            entries.extend(self.scan(lands, target.world, &exempt, &probes));
        }

        let price = self.price(lands, &target, economy);
        if price > 0.0 {
            let owner = request
                .owner
                .as_ref()
                .or(target.existing.map(Land::owner));
            if let Some(balance) = owner.and_then(|o| economy.balance(o)) {
                if balance < price {
                    entries.push(CollisionsEntry::new(LandError::NotEnoughMoney));
                }
            }
        }

        Ok(CollisionReport { entries, price })
    }

    /// Areas tested for overlap and parent containment.
    fn probes<'a>(&self, target: &Target<'a>, cycle: bool) -> Vec<(Option<u32>, &'a Area)> {
        match self.request.action {
            LandAction::LandAdd | LandAction::AreaAdd | LandAction::AreaModify => target
                .area
                .map(|area| vec![(target.area_id, area)])
                .unwrap_or_default(),
            LandAction::LandParent if !cycle => target
                .existing
                .map(|land| {
                    land.areas()
                        .iter()
                        .map(|(id, area)| (Some(*id), area))
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Geometry of the existing land once the mutation is applied.
    fn resulting_areas(&self, land: &Land, target: &Target<'_>) -> BTreeMap<u32, Area> {
        let mut areas = land.areas().clone();
        match (self.request.action, target.area_id, target.area) {
            (LandAction::AreaModify, Some(id), Some(area)) => {
                areas.insert(id, area.clone());
            }
            (LandAction::AreaRemove, Some(id), _) => {
                areas.remove(&id);
            }
            (LandAction::AreaAdd, _, Some(area)) => {
                areas.insert(land.next_area_id(), area.clone());
            }
            _ => {}
        }
        areas
    }

    /// One `Collision` entry per land whose areas cross any probe, sorted
    /// by land name.
    fn scan(
        &self,
        lands: &Lands,
        world: &str,
        exempt: &HashSet<LandId>,
        probes: &[(Option<u32>, &Area)],
    ) -> Vec<CollisionsEntry> {
        let candidates: Vec<&Land> = lands
            .lands_in_world(world)
            .filter(|land| !exempt.contains(&land.uuid()))
            .collect();
        let total = candidates.len();
        let done = AtomicUsize::new(0);

        let mut hits: Vec<&Land> = candidates
            .par_iter()
            .filter_map(|land| {
                let hit = land
                    .areas()
                    .values()
                    .any(|other| probes.iter().any(|(_, probe)| probe.intersects(other)));
                let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                self.report_progress(finished, total);
                hit.then_some(*land)
            })
            .collect();

        hits.sort_by(|a, b| a.name().cmp(b.name()));
        hits.into_iter()
            .map(|land| CollisionsEntry::with_land(LandError::Collision, land))
            .collect()
    }

    fn price(&self, lands: &Lands, target: &Target<'_>, economy: &dyn EconomyProvider) -> f64 {
        if self.request.is_free || !economy.is_enabled() {
            return 0.0;
        }
        let new_blocks = target.area.and_then(Area::volume).unwrap_or(0);
        let blocks = match self.request.action {
            LandAction::LandAdd | LandAction::AreaAdd => new_blocks,
            LandAction::AreaModify => {
                let old_blocks = target
                    .existing
                    .zip(target.area_id)
                    .and_then(|(land, id)| land.area(id))
                    .and_then(Area::volume)
                    .unwrap_or(0);
                new_blocks.saturating_sub(old_blocks)
            }
            _ => 0,
        };
        if blocks == 0 {
            return 0.0;
        }

        let block_price = match target.parent {
            Some(parent) => parent.flag_and_inherit(&FlagType::ECO_BLOCK_PRICE, lands),
            None => lands.flag_outside(target.world, &FlagType::ECO_BLOCK_PRICE),
        }
        .as_f64()
        .unwrap_or(0.0);

        if block_price > 0.0 {
            block_price * blocks as f64
        } else {
            economy.price_for_claim(target.world, blocks)
        }
    }
}

/// Lands a candidate may overlap: itself, its descendants and the
/// ancestors of its resulting position.
fn exempt_lands(lands: &Lands, target: &Target<'_>) -> HashSet<LandId> {
    let mut exempt = HashSet::new();
    if let Some(land) = target.existing {
        exempt.insert(land.uuid());
        exempt.extend(lands.descendants(land.uuid()));
    }
    if let Some(parent) = target.parent {
        exempt.insert(parent.uuid());
        exempt.extend(lands.ancestors(parent.uuid()));
    }
    exempt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::economy::{FlatRateEconomy, NoEconomy};
    use crate::lands::NewLand;
    use crate::permissions::{Flag, FlagValue, LandSettings};
    use crate::players::PlayerContainer;
    use uuid::Uuid;

    fn cuboid(x1: i32, z1: i32, x2: i32, z2: i32) -> Area {
        Area::cuboid("world", x1, 0, z1, x2, 255, z2).unwrap()
    }

    fn flat(x1: i32, z1: i32, x2: i32, z2: i32) -> Area {
        Area::cuboid("world", x1, 0, z1, x2, 0, z2).unwrap()
    }

    fn with_land1() -> (Lands, LandId) {
        let mut lands = Lands::default();
        let land1 = lands
            .create_land(NewLand::new("land1", PlayerContainer::Nobody, cuboid(0, 0, 100, 100)))
            .unwrap();
        (lands, land1)
    }

    fn check(lands: &Lands, request: CollisionRequest) -> CollisionReport {
        Collisions::new(request).run(lands, &NoEconomy).unwrap()
    }

    #[test]
    fn overlapping_new_land_collides() {
        let (lands, _) = with_land1();
        let report = check(
            &lands,
            CollisionRequest::land_add("landT", PlayerContainer::Nobody, cuboid(10, 10, 120, 120))
                .free(),
        );
        assert_eq!(report.count(LandError::Collision), 1);
        assert_eq!(report.entries[0].land_name.as_deref(), Some("land1"));
        assert!(report.allow_approve());
    }

    #[test]
    fn child_outside_parent_is_not_a_collision() {
        let (lands, land1) = with_land1();
        let report = check(
            &lands,
            CollisionRequest::land_add("landT", PlayerContainer::Nobody, cuboid(10, 10, 120, 120))
                .with_parent(land1)
                .free(),
        );
        assert!(report.has(LandError::OutOfParent));
        assert!(!report.has(LandError::Collision));
    }

    #[test]
    fn touching_the_parent_border_is_contained() {
        let (lands, land1) = with_land1();
        let report = check(
            &lands,
            CollisionRequest::land_add("edge", PlayerContainer::Nobody, cuboid(0, 0, 100, 100))
                .with_parent(land1)
                .free(),
        );
        assert!(!report.has_collisions(), "{:?}", report.entries);
    }

    #[test]
    fn crossing_a_sibling_collides() {
        let (mut lands, land1) = with_land1();
        lands
            .create_land(
                NewLand::new("plot_a", PlayerContainer::Nobody, cuboid(10, 10, 30, 30))
                    .with_parent(land1),
            )
            .unwrap();
        let report = check(
            &lands,
            CollisionRequest::land_add("plot_b", PlayerContainer::Nobody, cuboid(20, 20, 40, 40))
                .with_parent(land1)
                .free(),
        );
        assert_eq!(report.count(LandError::Collision), 1);
        assert_eq!(report.entries[0].land_name.as_deref(), Some("plot_a"));
    }

    #[test]
    fn resizing_below_children_reports_each_child() {
        let (mut lands, _) = with_land1();
        let land2 = lands
            .create_land(NewLand::new("land2", PlayerContainer::Nobody, cuboid(1000, 1000, 1100, 1100)))
            .unwrap();
        lands
            .create_land(
                NewLand::new("land3", PlayerContainer::Nobody, cuboid(1000, 1000, 1100, 1100))
                    .with_parent(land2),
            )
            .unwrap();
        lands
            .create_land(
                NewLand::new("land3b", PlayerContainer::Nobody, cuboid(1050, 1050, 1060, 1060))
                    .with_parent(land2),
            )
            .unwrap();

        let land = lands.get_land(land2).unwrap();
        let report = check(
            &lands,
            CollisionRequest::area_modify(land, 1, cuboid(10, 10, 120, 120)).free(),
        );
        assert_eq!(report.count(LandError::ChildOutOfBorder), 2);
        assert!(report.has(LandError::Collision));
    }

    #[test]
    fn removing_a_parent_reports_children() {
        let (mut lands, _) = with_land1();
        let land4 = lands
            .create_land(NewLand::new("land4", PlayerContainer::Nobody, cuboid(2000, 2000, 2100, 2100)))
            .unwrap();
        lands
            .create_land(
                NewLand::new("land5", PlayerContainer::Nobody, cuboid(2000, 2000, 2100, 2100))
                    .with_parent(land4),
            )
            .unwrap();
        let report = check(&lands, CollisionRequest::land_remove(lands.get_land(land4).unwrap()));
        assert_eq!(report.count(LandError::HasChildren), 1);
        assert_eq!(report.entries.len(), 1);
        assert!(!report.allow_approve());
    }

    #[test]
    fn duplicate_name_ignores_case() {
        let (mut lands, _) = with_land1();
        lands
            .create_land(NewLand::new("land6", PlayerContainer::Nobody, cuboid(3000, 3000, 3100, 3100)))
            .unwrap();
        let report = check(
            &lands,
            CollisionRequest::land_add("LAND6", PlayerContainer::Nobody, cuboid(5000, 5000, 5010, 5010))
                .free(),
        );
        assert!(report.has(LandError::NameInUse));
        assert!(!report.allow_approve());
    }

    #[test]
    fn removing_the_last_area_is_not_a_collision() {
        let (lands, land1) = with_land1();
        let report = check(
            &lands,
            CollisionRequest::area_remove(lands.get_land(land1).unwrap(), 1),
        );
        assert!(report.has(LandError::MustHaveAtLeastOneArea));
        assert!(!report.has(LandError::Collision));
    }

    #[test]
    fn reparenting_under_a_descendant_is_a_cycle() {
        let (mut lands, land1) = with_land1();
        let child = lands
            .create_land(
                NewLand::new("child", PlayerContainer::Nobody, cuboid(10, 10, 20, 20))
                    .with_parent(land1),
            )
            .unwrap();
        let report = check(
            &lands,
            CollisionRequest::land_parent(lands.get_land(land1).unwrap(), Some(child)),
        );
        assert!(report.has(LandError::ParentCycle));
        assert!(!report.allow_approve());

        // Detaching the child makes it cross its former parent.
        let report = check(
            &lands,
            CollisionRequest::land_parent(lands.get_land(child).unwrap(), None),
        );
        assert_eq!(report.count(LandError::Collision), 1);
    }

    #[test]
    fn pending_approval_blocks_same_name() {
        let (mut lands, _) = with_land1();
        let request =
            CollisionRequest::land_add("queued", PlayerContainer::Nobody, cuboid(500, 500, 510, 510));
        lands
            .approvals_mut()
            .add(crate::lands::Approve::new(request.clone(), 0.0));
        let report = check(&lands, request);
        assert!(report.has(LandError::InApprove));
    }

    #[test]
    fn pending_approval_blocks_area_changes_too() {
        let (mut lands, land1) = with_land1();
        let land = lands.get_land(land1).unwrap();
        let queued = CollisionRequest::area_add(land, cuboid(200, 200, 210, 210));
        let next = CollisionRequest::area_modify(land, 1, cuboid(0, 0, 120, 120));
        lands
            .approvals_mut()
            .add(crate::lands::Approve::new(queued, 0.0));
        let report = check(&lands, next);
        assert!(report.has(LandError::InApprove));
        assert!(!report.allow_approve());
    }

    #[test]
    fn pricing_uses_economy_and_balance() {
        let (lands, _) = with_land1();
        let alice = Uuid::from_u128(5);
        let economy = FlatRateEconomy::new(1.0);
        economy.deposit(alice, 50.0);

        let request = CollisionRequest::land_add(
            "shop",
            PlayerContainer::player(alice),
            flat(500, 500, 509, 509),
        );
        let report = Collisions::new(request.clone()).run(&lands, &economy).unwrap();
        assert_eq!(report.price, 100.0);
        assert!(report.has(LandError::NotEnoughMoney));

        let report = Collisions::new(request.free()).run(&lands, &economy).unwrap();
        assert_eq!(report.price, 0.0);
        assert!(!report.has_collisions());
    }

    #[test]
    fn area_modify_bills_growth_only() {
        let mut lands = Lands::default();
        let id = lands
            .create_land(NewLand::new("farm", PlayerContainer::Nobody, flat(0, 0, 9, 9)))
            .unwrap();
        let economy = FlatRateEconomy::new(2.0);
        let land = lands.get_land(id).unwrap();

        let grow = CollisionRequest::area_modify(land, 1, flat(0, 0, 19, 9));
        let report = Collisions::new(grow).run(&lands, &economy).unwrap();
        assert_eq!(report.price, 200.0);

        let shrink = CollisionRequest::area_modify(land, 1, flat(0, 0, 4, 4));
        let report = Collisions::new(shrink).run(&lands, &economy).unwrap();
        assert_eq!(report.price, 0.0);
    }

    #[test]
    fn block_price_flag_overrides_economy_rate() {
        let mut lands = Lands::default();
        let mut outside = LandSettings::default();
        outside.add_flag(Flag::new(
            FlagType::ECO_BLOCK_PRICE,
            FlagValue::Double(0.5),
            true,
        ));
        lands.set_outside_defaults(outside);
        let request =
            CollisionRequest::land_add("cheap", PlayerContainer::Nobody, flat(0, 0, 9, 9));
        let report = Collisions::new(request)
            .run(&lands, &FlatRateEconomy::new(10.0))
            .unwrap();
        assert_eq!(report.price, 50.0);
    }

    #[test]
    fn without_an_economy_the_block_price_flag_is_ignored() {
        let mut lands = Lands::default();
        let mut outside = LandSettings::default();
        outside.add_flag(Flag::new(
            FlagType::ECO_BLOCK_PRICE,
            FlagValue::Double(0.5),
            true,
        ));
        lands.set_outside_defaults(outside);
        let request =
            CollisionRequest::land_add("gratis", PlayerContainer::Nobody, flat(0, 0, 9, 9));
        let report = Collisions::new(request).run(&lands, &NoEconomy).unwrap();
        assert_eq!(report.price, 0.0);
        assert!(!report.has_collisions());
    }

    #[test]
    fn world_sized_claims_price_without_overflow() {
        let lands = Lands::default();
        let everything =
            Area::cuboid("world", i32::MIN, 0, i32::MIN, i32::MAX, 255, i32::MAX).unwrap();
        let request = CollisionRequest::land_add("world", PlayerContainer::Nobody, everything);
        let report = Collisions::new(request)
            .run(&lands, &FlatRateEconomy::new(1.0))
            .unwrap();
        assert_eq!(report.price, u64::MAX as f64);
    }

    #[test]
    fn malformed_requests_fail_hard() {
        let (lands, land1) = with_land1();
        let land = lands.get_land(land1).unwrap();
        assert!(matches!(
            Collisions::new(CollisionRequest::area_remove(land, 9)).run(&lands, &NoEconomy),
            Err(CollisionsError::AreaNotFound { area_id: 9, .. })
        ));

        let mut request = CollisionRequest::area_add(land, cuboid(0, 0, 1, 1));
        request.area = None;
        assert!(matches!(
            Collisions::new(request).run(&lands, &NoEconomy),
            Err(CollisionsError::MissingArea(LandAction::AreaAdd))
        ));

        let mut request = CollisionRequest::land_remove(land);
        request.existing = Some(Uuid::from_u128(404));
        assert!(matches!(
            Collisions::new(request).run(&lands, &NoEconomy),
            Err(CollisionsError::LandNotFound(_))
        ));
    }

    #[test]
    fn a_job_runs_once_and_reports_progress() {
        let (lands, _) = with_land1();
        let (tx, rx) = watch::channel(JobProgress::created());
        let mut job = Collisions::new(
            CollisionRequest::land_add("x", PlayerContainer::Nobody, cuboid(500, 500, 510, 510)),
        )
        .with_progress(tx);
        assert_eq!(job.state(), JobState::Created);
        job.run(&lands, &NoEconomy).unwrap();
        assert_eq!(job.state(), JobState::Done);
        assert_eq!(
            *rx.borrow(),
            JobProgress {
                state: JobState::Done,
                percent: 100
            }
        );
        assert!(matches!(
            job.run(&lands, &NoEconomy),
            Err(CollisionsError::AlreadyChecked)
        ));
    }
}
