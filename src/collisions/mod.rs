//! Collision engine: validates a proposed land mutation against the
//! hierarchy and reports every conflict in one pass.

pub mod check;
pub mod manager;
pub mod policy;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::economy::EconomyError;
use crate::geometry::Area;
use crate::lands::{Land, LandId, LandType, LandsError};
use crate::players::PlayerContainer;

pub use check::Collisions;
pub use manager::{CollisionJob, CollisionsManager, CommitOutcome, SharedLands};
pub use policy::{AllowCollision, Decision};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LandAction {
    LandAdd,
    LandRemove,
    LandParent,
    AreaAdd,
    AreaModify,
    AreaRemove,
}

impl LandAction {
    /// Actions that need a candidate area.
    pub fn needs_area(self) -> bool {
        matches!(
            self,
            LandAction::LandAdd | LandAction::AreaAdd | LandAction::AreaModify
        )
    }

    /// Actions that need the id of an existing area.
    pub fn needs_area_id(self) -> bool {
        matches!(self, LandAction::AreaModify | LandAction::AreaRemove)
    }
}

/// Kind of problem found by a collision check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LandError {
    Collision,
    NameInUse,
    InApprove,
    HasChildren,
    ChildOutOfBorder,
    OutOfParent,
    MustHaveAtLeastOneArea,
    GeometryInvalid,
    NotEnoughMoney,
    ParentCycle,
}

impl LandError {
    /// Fatal problems can never be waived through the approval queue.
    pub fn is_fatal(self) -> bool {
        !matches!(
            self,
            LandError::Collision | LandError::OutOfParent | LandError::ChildOutOfBorder
        )
    }

    pub fn message_key(self) -> &'static str {
        match self {
            LandError::Collision => "COLLISION.SHOW.COLLISION",
            LandError::NameInUse => "COLLISION.SHOW.NAME_IN_USE",
            LandError::InApprove => "COLLISION.SHOW.IN_APPROVE",
            LandError::HasChildren => "COLLISION.SHOW.HAS_CHILDREN",
            LandError::ChildOutOfBorder => "COLLISION.SHOW.CHILD_OUT_OF_BORDER",
            LandError::OutOfParent => "COLLISION.SHOW.OUT_OF_PARENT",
            LandError::MustHaveAtLeastOneArea => "COLLISION.SHOW.MUST_HAVE_AT_LEAST_ONE_AREA",
            LandError::GeometryInvalid => "COLLISION.SHOW.GEOMETRY_INVALID",
            LandError::NotEnoughMoney => "COLLISION.SHOW.NOT_ENOUGH_MONEY",
            LandError::ParentCycle => "COLLISION.SHOW.PARENT_CYCLE",
        }
    }
}

/// One problem found by a check. `land` is the other land involved, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionsEntry {
    pub error: LandError,
    pub land: Option<LandId>,
    pub land_name: Option<String>,
    pub area_id: Option<u32>,
}

impl CollisionsEntry {
    pub fn new(error: LandError) -> Self {
        Self {
            error,
            land: None,
            land_name: None,
            area_id: None,
        }
    }

    pub fn with_land(error: LandError, land: &Land) -> Self {
        Self {
            error,
            land: Some(land.uuid()),
            land_name: Some(land.name().to_string()),
            area_id: None,
        }
    }

    pub fn with_area(mut self, area_id: u32) -> Self {
        self.area_id = Some(area_id);
        self
    }

    pub fn message(&self) -> String {
        let land = self.land_name.as_deref().unwrap_or("?");
        match self.error {
            LandError::Collision => format!("collides with land '{}'", land),
            LandError::NameInUse => "the land name is already in use".to_string(),
            LandError::InApprove => "a request for this land is waiting for approval".to_string(),
            LandError::HasChildren => format!("the land still has the child land '{}'", land),
            LandError::ChildOutOfBorder => {
                format!("the child land '{}' would be outside the land", land)
            }
            LandError::OutOfParent => format!("the area is outside the parent land '{}'", land),
            LandError::MustHaveAtLeastOneArea => "a land must keep at least one area".to_string(),
            LandError::GeometryInvalid => "the area is not valid for this land".to_string(),
            LandError::NotEnoughMoney => "the owner cannot pay for this claim".to_string(),
            LandError::ParentCycle => {
                format!("the land '{}' is this land or one of its children", land)
            }
        }
    }
}

impl fmt::Display for CollisionsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error.message_key(), self.message())
    }
}

/// A proposed land mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionRequest {
    pub world: String,
    pub land_name: String,
    pub action: LandAction,
    pub existing: Option<LandId>,
    pub area_id: Option<u32>,
    pub area: Option<Area>,
    /// New parent for `LandAdd` and `LandParent`; ignored otherwise.
    pub parent: Option<LandId>,
    pub owner: Option<PlayerContainer>,
    /// Category of a new land; only read by `LandAdd`.
    #[serde(default)]
    pub land_type: Option<LandType>,
    pub is_free: bool,
    pub allow_approve: bool,
}

impl CollisionRequest {
    fn base(world: &str, land_name: &str, action: LandAction) -> Self {
        Self {
            world: world.to_string(),
            land_name: land_name.trim().to_lowercase(),
            action,
            existing: None,
            area_id: None,
            area: None,
            parent: None,
            owner: None,
            land_type: None,
            is_free: false,
            allow_approve: false,
        }
    }

    fn for_land(land: &Land, action: LandAction) -> Self {
        let mut request = Self::base(land.world(), land.name(), action);
        request.existing = Some(land.uuid());
        request.owner = Some(land.owner().clone());
        request
    }

    pub fn land_add(land_name: &str, owner: PlayerContainer, area: Area) -> Self {
        let mut request = Self::base(area.world(), land_name, LandAction::LandAdd);
        request.owner = Some(owner);
        request.area = Some(area);
        request
    }

    pub fn land_remove(land: &Land) -> Self {
        Self::for_land(land, LandAction::LandRemove)
    }

    pub fn land_parent(land: &Land, parent: Option<LandId>) -> Self {
        let mut request = Self::for_land(land, LandAction::LandParent);
        request.parent = parent;
        request
    }

    pub fn area_add(land: &Land, area: Area) -> Self {
        let mut request = Self::for_land(land, LandAction::AreaAdd);
        request.area = Some(area);
        request
    }

    pub fn area_modify(land: &Land, area_id: u32, area: Area) -> Self {
        let mut request = Self::for_land(land, LandAction::AreaModify);
        request.area_id = Some(area_id);
        request.area = Some(area);
        request
    }

    pub fn area_remove(land: &Land, area_id: u32) -> Self {
        let mut request = Self::for_land(land, LandAction::AreaRemove);
        request.area_id = Some(area_id);
        request
    }

    pub fn with_parent(mut self, parent: LandId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_type(mut self, land_type: LandType) -> Self {
        self.land_type = Some(land_type);
        self
    }

    /// Skip pricing.
    pub fn free(mut self) -> Self {
        self.is_free = true;
        self
    }

    /// Let waivable problems be queued for approval instead of rejected.
    pub fn allow_approve(mut self) -> Self {
        self.allow_approve = true;
        self
    }
}

/// Result of one collision check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollisionReport {
    pub entries: Vec<CollisionsEntry>,
    pub price: f64,
}

impl CollisionReport {
    pub fn has_collisions(&self) -> bool {
        !self.entries.is_empty()
    }

    /// True when every entry can be waived through the approval queue.
    pub fn allow_approve(&self) -> bool {
        !self.entries.iter().any(|e| e.error.is_fatal())
    }

    pub fn has(&self, error: LandError) -> bool {
        self.entries.iter().any(|e| e.error == error)
    }

    pub fn count(&self, error: LandError) -> usize {
        self.entries.iter().filter(|e| e.error == error).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Checking,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub state: JobState,
    pub percent: u8,
}

impl JobProgress {
    pub fn created() -> Self {
        Self {
            state: JobState::Created,
            percent: 0,
        }
    }
}

/// Hard failures: the request could not be checked or applied at all.
#[derive(Debug, Error)]
pub enum CollisionsError {
    #[error("land {0} not found")]
    LandNotFound(LandId),
    #[error("parent land {0} not found")]
    ParentNotFound(LandId),
    #[error("{0:?} requires an existing land")]
    MissingLand(LandAction),
    #[error("{0:?} requires a candidate area")]
    MissingArea(LandAction),
    #[error("{0:?} requires an area id")]
    MissingAreaId(LandAction),
    #[error("area {area_id} not found in '{land}'")]
    AreaNotFound { land: String, area_id: u32 },
    #[error("a new land requires an owner")]
    MissingOwner,
    #[error("this collision check has already run")]
    AlreadyChecked,
    #[error("caller {0} already has a collision check running")]
    AlreadyRunning(Uuid),
    #[error("no approval pending for '{0}'")]
    ApprovalNotFound(String),
    #[error("collision worker failed: {0}")]
    Worker(String),
    #[error(transparent)]
    Lands(#[from] LandsError),
    #[error(transparent)]
    Economy(#[from] EconomyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(!LandError::Collision.is_fatal());
        assert!(!LandError::OutOfParent.is_fatal());
        assert!(!LandError::ChildOutOfBorder.is_fatal());
        assert!(LandError::NameInUse.is_fatal());
        assert!(LandError::HasChildren.is_fatal());
        assert!(LandError::MustHaveAtLeastOneArea.is_fatal());
        assert!(LandError::GeometryInvalid.is_fatal());
    }

    #[test]
    fn report_summary() {
        let mut report = CollisionReport::default();
        assert!(!report.has_collisions());
        assert!(report.allow_approve());
        report.entries.push(CollisionsEntry::new(LandError::Collision));
        assert!(report.has_collisions());
        assert!(report.allow_approve());
        report.entries.push(CollisionsEntry::new(LandError::NameInUse));
        assert!(!report.allow_approve());
        assert_eq!(report.count(LandError::Collision), 1);
    }
}
