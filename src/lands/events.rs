use uuid::Uuid;

/// What changed on a land. Every structural mutation of [`super::Lands`]
/// publishes exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    Created,
    Removed,
    Renamed { old_name: String },
    AreaAdded(u32),
    AreaModified(u32),
    AreaRemoved(u32),
    ParentChanged,
    OwnerChanged,
    ResidentsChanged,
    BannedChanged,
    PermissionsChanged,
    FlagsChanged,
    PriorityChanged,
    TypeChanged,
    EconomyChanged,
    NotifyChanged,
}

impl ChangeKind {
    /// Removal is the only change that deletes the persisted record.
    pub fn is_removal(&self) -> bool {
        matches!(self, ChangeKind::Removed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandChange {
    pub land: Uuid,
    pub land_name: String,
    pub kind: ChangeKind,
}
