//! Async front of the collision engine: runs checks off the caller's task
//! and serialises commits through the index lock.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::check::Collisions;
use super::policy::{AllowCollision, Decision};
use super::{CollisionReport, CollisionRequest, CollisionsError, JobProgress, LandAction};
use crate::economy::EconomyProvider;
use crate::lands::{Approve, LandId, Lands, NewLand};

pub type SharedLands = Arc<RwLock<Lands>>;

/// What a commit did with the request.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The mutation was applied to `land`.
    Applied { land: LandId, report: CollisionReport },
    /// The request waits in the approval queue.
    Queued { report: CollisionReport },
    Rejected { report: CollisionReport },
}

impl CommitOutcome {
    pub fn report(&self) -> &CollisionReport {
        match self {
            CommitOutcome::Applied { report, .. }
            | CommitOutcome::Queued { report }
            | CommitOutcome::Rejected { report } => report,
        }
    }
}

/// A running check. The job always runs to completion.
pub struct CollisionJob {
    pub progress: watch::Receiver<JobProgress>,
    handle: JoinHandle<Result<CollisionReport, CollisionsError>>,
}

impl CollisionJob {
    pub async fn wait(self) -> Result<CollisionReport, CollisionsError> {
        self.handle
            .await
            .map_err(|e| CollisionsError::Worker(e.to_string()))?
    }
}

/// Releases a caller's in-flight slot when the job ends, panics included.
struct InFlight {
    callers: Arc<Mutex<HashSet<Uuid>>>,
    caller: Uuid,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.callers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.caller);
    }
}

pub struct CollisionsManager {
    lands: SharedLands,
    economy: Arc<dyn EconomyProvider>,
    policy: AllowCollision,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl CollisionsManager {
    pub fn new(lands: SharedLands, economy: Arc<dyn EconomyProvider>, policy: AllowCollision) -> Self {
        Self {
            lands,
            economy,
            policy,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn lands(&self) -> &SharedLands {
        &self.lands
    }

    pub fn policy(&self) -> AllowCollision {
        self.policy
    }

    /// Start a check for `caller`. Each caller may have one check running at
    /// a time. The check holds the index read lock until it finishes.
    pub fn submit(
        &self,
        caller: Uuid,
        request: CollisionRequest,
    ) -> Result<CollisionJob, CollisionsError> {
        let inserted = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(caller);
        if !inserted {
            return Err(CollisionsError::AlreadyRunning(caller));
        }
        let slot = InFlight {
            callers: Arc::clone(&self.in_flight),
            caller,
        };

        let (tx, rx) = watch::channel(JobProgress::created());
        let lands = Arc::clone(&self.lands);
        let economy = Arc::clone(&self.economy);

        let handle = tokio::spawn(async move {
            let _slot = slot;
            let guard = lands.read_owned().await;
            tokio::task::spawn_blocking(move || {
                Collisions::new(request)
                    .with_progress(tx)
                    .run(&guard, economy.as_ref())
            })
            .await
            .map_err(|e| CollisionsError::Worker(e.to_string()))?
        });

        Ok(CollisionJob {
            progress: rx,
            handle,
        })
    }

    /// Check `request` again under the write lock and apply, queue or reject
    /// it according to the policy.
    pub async fn commit(&self, request: CollisionRequest) -> Result<CommitOutcome, CollisionsError> {
        let mut guard = Arc::clone(&self.lands).write_owned().await;
        let economy = Arc::clone(&self.economy);
        let policy = self.policy;

        tokio::task::spawn_blocking(move || {
            let report = Collisions::new(request.clone()).run(&guard, economy.as_ref())?;
            match policy.decide(&report, request.allow_approve) {
                Decision::Commit => {
                    let land = apply(&mut guard, &request, report.price, economy.as_ref())?;
                    Ok(CommitOutcome::Applied { land, report })
                }
                Decision::QueueForApproval => {
                    info!(land = %request.land_name, action = ?request.action, "request queued for approval");
                    let land_name = request.land_name.clone();
                    if let Some(replaced) = guard
                        .approvals_mut()
                        .add(Approve::new(request, report.price))
                    {
                        warn!(land = %land_name, action = ?replaced.request.action, "pending request replaced");
                    }
                    Ok(CommitOutcome::Queued { report })
                }
                Decision::Reject => {
                    info!(
                        land = %request.land_name,
                        entries = report.entries.len(),
                        "request rejected"
                    );
                    Ok(CommitOutcome::Rejected { report })
                }
            }
        })
        .await
        .map_err(|e| CollisionsError::Worker(e.to_string()))?
    }

    /// Accept a queued request: it is checked again against the current
    /// index and applied unless a fatal problem appeared meanwhile. The
    /// approval is consumed either way.
    pub async fn accept_approval(&self, land_name: &str) -> Result<CommitOutcome, CollisionsError> {
        let mut guard = Arc::clone(&self.lands).write_owned().await;
        let approve = guard
            .approvals_mut()
            .remove(land_name)
            .ok_or_else(|| CollisionsError::ApprovalNotFound(land_name.to_string()))?;
        let economy = Arc::clone(&self.economy);

        tokio::task::spawn_blocking(move || {
            let request = approve.request;
            let report = Collisions::new(request.clone()).run(&guard, economy.as_ref())?;
            if !report.allow_approve() {
                warn!(land = %request.land_name, "approved request is no longer valid");
                return Ok(CommitOutcome::Rejected { report });
            }
            let land = apply(&mut guard, &request, report.price, economy.as_ref())?;
            info!(land = %request.land_name, "approved request applied");
            Ok(CommitOutcome::Applied { land, report })
        })
        .await
        .map_err(|e| CollisionsError::Worker(e.to_string()))?
    }

    pub async fn reject_approval(&self, land_name: &str) -> Result<Approve, CollisionsError> {
        let mut guard = self.lands.write().await;
        let approve = guard
            .approvals_mut()
            .remove(land_name)
            .ok_or_else(|| CollisionsError::ApprovalNotFound(land_name.to_string()))?;
        info!(land = %approve.land_name(), "approval rejected");
        Ok(approve)
    }
}

/// Apply a checked request. The payer is charged first and refunded if the
/// mutation fails.
fn apply(
    lands: &mut Lands,
    request: &CollisionRequest,
    price: f64,
    economy: &dyn EconomyProvider,
) -> Result<LandId, CollisionsError> {
    let payer = request
        .owner
        .clone()
        .or_else(|| request.existing.and_then(|id| lands.get_land(id)).map(|l| l.owner().clone()));
    let charged = match &payer {
        Some(payer) if price > 0.0 => {
            economy.charge_player(payer, price)?;
            true
        }
        _ => false,
    };

    let result = mutate(lands, request);
    if let (Err(err), true, Some(payer)) = (&result, charged, &payer) {
        warn!(land = %request.land_name, error = %err, "mutation failed, refunding");
        economy.pay_player(payer, price)?;
    }
    result
}

fn mutate(lands: &mut Lands, request: &CollisionRequest) -> Result<LandId, CollisionsError> {
    let existing = || request.existing.ok_or(CollisionsError::MissingLand(request.action));
    let area = || {
        request
            .area
            .clone()
            .ok_or(CollisionsError::MissingArea(request.action))
    };
    let area_id = || {
        request
            .area_id
            .ok_or(CollisionsError::MissingAreaId(request.action))
    };

    match request.action {
        LandAction::LandAdd => {
            let owner = request.owner.clone().ok_or(CollisionsError::MissingOwner)?;
            let mut new = NewLand::new(&request.land_name, owner, area()?);
            new.parent = request.parent;
            new.land_type = request.land_type.clone();
            Ok(lands.create_land(new)?)
        }
        LandAction::LandRemove => {
            let id = existing()?;
            lands.remove_land(id, false)?;
            Ok(id)
        }
        LandAction::LandParent => {
            let id = existing()?;
            lands.set_parent(id, request.parent)?;
            Ok(id)
        }
        LandAction::AreaAdd => {
            let id = existing()?;
            lands.add_area(id, area()?)?;
            Ok(id)
        }
        LandAction::AreaModify => {
            let id = existing()?;
            lands.replace_area(id, area_id()?, area()?)?;
            Ok(id)
        }
        LandAction::AreaRemove => {
            let id = existing()?;
            lands.remove_area(id, area_id()?)?;
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collisions::LandError;
    use crate::economy::{FlatRateEconomy, NoEconomy};
    use crate::geometry::Area;
    use crate::lands::LandType;
    use crate::permissions::{Flag, FlagType, FlagValue, LandSettings};
    use crate::players::PlayerContainer;

    fn cuboid(x1: i32, z1: i32, x2: i32, z2: i32) -> Area {
        Area::cuboid("world", x1, 0, z1, x2, 255, z2).unwrap()
    }

    fn manager(policy: AllowCollision) -> CollisionsManager {
        CollisionsManager::new(
            Arc::new(RwLock::new(Lands::default())),
            Arc::new(NoEconomy),
            policy,
        )
    }

    fn add(name: &str, area: Area) -> CollisionRequest {
        CollisionRequest::land_add(name, PlayerContainer::Nobody, area).free()
    }

    #[tokio::test]
    async fn submit_reports_and_frees_the_caller() {
        let manager = manager(AllowCollision::Deny);
        let caller = Uuid::new_v4();
        let job = manager.submit(caller, add("a", cuboid(0, 0, 10, 10))).unwrap();
        let report = job.wait().await.unwrap();
        assert!(!report.has_collisions());

        // The slot is released once the job is done.
        let again = manager.submit(caller, add("a", cuboid(0, 0, 10, 10))).unwrap();
        again.wait().await.unwrap();
    }

    #[tokio::test]
    async fn one_job_per_caller() {
        let manager = manager(AllowCollision::Deny);
        let caller = Uuid::new_v4();
        // Hold the write lock so the first job cannot finish.
        let lock = Arc::clone(manager.lands()).write_owned().await;
        let first = manager.submit(caller, add("a", cuboid(0, 0, 10, 10))).unwrap();
        assert!(matches!(
            manager.submit(caller, add("b", cuboid(0, 0, 10, 10))),
            Err(CollisionsError::AlreadyRunning(_))
        ));
        let other = manager
            .submit(Uuid::new_v4(), add("c", cuboid(0, 0, 10, 10)))
            .unwrap();
        drop(lock);
        first.wait().await.unwrap();
        other.wait().await.unwrap();
    }

    #[tokio::test]
    async fn commit_applies_clean_requests() {
        let manager = manager(AllowCollision::Deny);
        let outcome = manager.commit(add("home", cuboid(0, 0, 10, 10))).await.unwrap();
        let land = match outcome {
            CommitOutcome::Applied { land, .. } => land,
            other => panic!("expected the land to be created, got {:?}", other),
        };
        let lands = manager.lands().read().await;
        assert_eq!(lands.get_land(land).unwrap().name(), "home");
    }

    #[tokio::test]
    async fn commit_rechecks_against_current_state() {
        let manager = manager(AllowCollision::Deny);
        let request = add("home", cuboid(0, 0, 10, 10));
        let report = manager
            .submit(Uuid::new_v4(), request.clone())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(!report.has_collisions());

        // Another land takes the spot between check and commit.
        manager.commit(add("thief", cuboid(5, 5, 20, 20))).await.unwrap();
        let outcome = manager.commit(request).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Rejected { .. }));
        assert!(outcome.report().has(LandError::Collision));
    }

    #[tokio::test]
    async fn approve_policy_queues_then_accepts() {
        let manager = manager(AllowCollision::Approve);
        manager.commit(add("first", cuboid(0, 0, 10, 10))).await.unwrap();

        let crossing = add("second", cuboid(5, 5, 20, 20)).allow_approve();
        let outcome = manager.commit(crossing).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Queued { .. }));
        assert!(manager.lands().read().await.approvals().is_in_approve("second"));

        let outcome = manager.accept_approval("SECOND").await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Applied { .. }));
        let lands = manager.lands().read().await;
        assert!(lands.get_land_by_name("second").is_some());
        assert!(lands.approvals().is_empty());
    }

    #[tokio::test]
    async fn a_queued_request_is_never_overwritten() {
        let manager = manager(AllowCollision::Approve);
        manager.commit(add("first", cuboid(0, 0, 10, 10))).await.unwrap();
        manager.commit(add("second", cuboid(50, 50, 60, 60))).await.unwrap();

        let (grow, modify) = {
            let lands = manager.lands().read().await;
            let second = lands.get_land_by_name("second").unwrap();
            (
                CollisionRequest::area_add(second, cuboid(5, 5, 20, 20)).free().allow_approve(),
                CollisionRequest::area_modify(second, 1, cuboid(0, 0, 60, 60))
                    .free()
                    .allow_approve(),
            )
        };
        let outcome = manager.commit(grow).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Queued { .. }));
        let outcome = manager.commit(modify).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Rejected { .. }));
        assert!(outcome.report().has(LandError::InApprove));

        let lands = manager.lands().read().await;
        assert_eq!(lands.approvals().len(), 1);
        let pending = lands.approvals().get("second").unwrap();
        assert_eq!(pending.request.action, LandAction::AreaAdd);
    }

    #[tokio::test]
    async fn new_lands_keep_their_type() {
        let manager = manager(AllowCollision::Deny);
        let farm = LandType::new("Farm");
        let mut defaults = LandSettings::default();
        defaults.add_flag(Flag::new(FlagType::ECO_BLOCK_PRICE, FlagValue::Double(2.0), true));
        manager.lands().write().await.set_type_defaults(farm.clone(), defaults);

        let request = add("fields", cuboid(0, 0, 10, 10)).with_type(farm.clone());
        let land = match manager.commit(request).await.unwrap() {
            CommitOutcome::Applied { land, .. } => land,
            other => panic!("expected the land to be created, got {:?}", other),
        };
        let lands = manager.lands().read().await;
        assert_eq!(lands.get_land(land).unwrap().land_type(), Some(&farm));
        assert_eq!(
            lands.flag_at("world", 5, 10, 5, &FlagType::ECO_BLOCK_PRICE),
            FlagValue::Double(2.0)
        );
    }

    #[tokio::test]
    async fn approve_policy_without_waiver_rejects() {
        let manager = manager(AllowCollision::Approve);
        manager.commit(add("first", cuboid(0, 0, 10, 10))).await.unwrap();
        let outcome = manager.commit(add("second", cuboid(5, 5, 20, 20))).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Rejected { .. }));
        assert!(manager.lands().read().await.approvals().is_empty());
    }

    #[tokio::test]
    async fn rejecting_drops_the_request() {
        let manager = manager(AllowCollision::Approve);
        manager.commit(add("first", cuboid(0, 0, 10, 10))).await.unwrap();
        manager
            .commit(add("second", cuboid(5, 5, 20, 20)).allow_approve())
            .await
            .unwrap();
        let dropped = manager.reject_approval("second").await.unwrap();
        assert_eq!(dropped.land_name(), "second");
        assert!(matches!(
            manager.reject_approval("second").await,
            Err(CollisionsError::ApprovalNotFound(_))
        ));
    }

    #[tokio::test]
    async fn commit_charges_the_owner() {
        let economy = Arc::new(FlatRateEconomy::new(1.0));
        let alice = Uuid::from_u128(8);
        economy.deposit(alice, 1000.0);
        let manager = CollisionsManager::new(
            Arc::new(RwLock::new(Lands::default())),
            economy.clone(),
            AllowCollision::Deny,
        );
        let area = Area::cuboid("world", 0, 0, 0, 9, 0, 9).unwrap();
        let request = CollisionRequest::land_add("shop", PlayerContainer::player(alice), area);
        let outcome = manager.commit(request).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::Applied { .. }));
        assert_eq!(economy.balance(&PlayerContainer::player(alice)), Some(900.0));
    }
}
