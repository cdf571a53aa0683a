//! Persisted form of a land and the two-pass loader that rebuilds the
//! hierarchy from a flat list of records.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::geometry::Area;
use crate::lands::{Land, LandType, Lands, LandsError, NewLand, RentInfo, SaleInfo};
use crate::permissions::{Flag, LandSettings};
use crate::players::PlayerContainer;
use crate::wire::WireError;

pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("land '{name}': {source}")]
    Wire { name: String, source: WireError },
    #[error("land '{0}' has no area")]
    NoArea(String),
    #[error(transparent)]
    Lands(#[from] LandsError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRecord {
    pub id: u32,
    pub area: String,
}

/// A land as written to storage. Containers, areas, permissions and flags
/// use their wire formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandRecord {
    pub version: u32,
    pub uuid: Uuid,
    pub name: String,
    pub land_type: Option<String>,
    pub owner: String,
    pub parent: Option<Uuid>,
    pub priority: i16,
    pub areas: Vec<AreaRecord>,
    pub residents: Vec<String>,
    pub banned: Vec<String>,
    pub permissions: Vec<String>,
    pub flags: Vec<String>,
    pub money: f64,
    pub player_notify: Vec<Uuid>,
    pub sale: Option<SaleInfo>,
    pub rent: Option<RentInfo>,
}

impl LandRecord {
    pub fn from_land(land: &Land) -> Self {
        Self {
            version: RECORD_VERSION,
            uuid: land.uuid(),
            name: land.name().to_string(),
            land_type: land.land_type().map(|t| t.name().to_string()),
            owner: land.owner().to_wire(),
            parent: land.parent(),
            priority: land.priority(),
            areas: land
                .areas()
                .iter()
                .map(|(id, area)| AreaRecord {
                    id: *id,
                    area: area.to_wire(),
                })
                .collect(),
            residents: land.residents().iter().map(PlayerContainer::to_wire).collect(),
            banned: land.banned().iter().map(PlayerContainer::to_wire).collect(),
            permissions: land.settings().permission_wires(),
            flags: land.settings().flag_wires(),
            money: land.money(),
            player_notify: land.player_notify().iter().copied().collect(),
            sale: land.sale().cloned(),
            rent: land.rent().cloned(),
        }
    }
}

/// A record with every wire string decoded, ready to insert.
struct ParsedRecord {
    owner: PlayerContainer,
    areas: Vec<(u32, Area)>,
    residents: Vec<PlayerContainer>,
    banned: Vec<PlayerContainer>,
    settings: LandSettings,
}

fn parse(record: &LandRecord) -> Result<ParsedRecord, RecordError> {
    let wire = |source: WireError| RecordError::Wire {
        name: record.name.clone(),
        source,
    };
    let containers = |values: &[String]| -> Result<Vec<PlayerContainer>, RecordError> {
        values
            .iter()
            .map(|v| PlayerContainer::from_wire(v).map_err(wire))
            .collect()
    };

    let areas = record
        .areas
        .iter()
        .map(|a| Area::from_wire(&a.area).map(|area| (a.id, area)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(wire)?;
    if areas.is_empty() {
        return Err(RecordError::NoArea(record.name.clone()));
    }

    Ok(ParsedRecord {
        owner: PlayerContainer::from_wire(&record.owner).map_err(wire)?,
        areas,
        residents: containers(&record.residents)?,
        banned: containers(&record.banned)?,
        settings: LandSettings::from_wires(&record.permissions, &record.flags).map_err(wire)?,
    })
}

/// Insert one record as a root land; the parent link is restored later.
fn insert(lands: &mut Lands, record: &LandRecord) -> Result<Uuid, RecordError> {
    let parsed = parse(record)?;
    let mut areas = parsed.areas.into_iter();
    let Some((first_id, first_area)) = areas.next() else {
        return Err(RecordError::NoArea(record.name.clone()));
    };

    let mut new = NewLand::new(&record.name, parsed.owner, first_area)
        .with_uuid(record.uuid)
        .with_area_id(first_id)
        .with_priority(record.priority);
    new.land_type = record.land_type.as_deref().map(LandType::new);
    let id = lands.create_land(new)?;

    let filled = fill(lands, id, record, areas, parsed.residents, parsed.banned, parsed.settings);
    if let Err(err) = filled {
        // Leave nothing half-loaded behind.
        let _ = lands.remove_land(id, true);
        return Err(err);
    }
    Ok(id)
}

fn fill(
    lands: &mut Lands,
    id: Uuid,
    record: &LandRecord,
    areas: impl Iterator<Item = (u32, Area)>,
    residents: Vec<PlayerContainer>,
    banned: Vec<PlayerContainer>,
    settings: LandSettings,
) -> Result<(), RecordError> {
    for (area_id, area) in areas {
        lands.add_area_with_id(id, area_id, area)?;
    }
    for resident in residents {
        lands.add_resident(id, resident)?;
    }
    for container in banned {
        lands.add_banned(id, container)?;
    }
    for (container, table) in settings.permissions() {
        for permission in table.values() {
            lands.add_permission(id, container.clone(), permission.clone())?;
        }
    }
    for flag in settings.flags() {
        if let Err(err) = lands.set_flag(id, Flag::clone(flag)) {
            warn!(land = %record.name, error = %err, "flag skipped");
        }
    }
    lands.set_money(id, record.money)?;
    for player in &record.player_notify {
        lands.add_player_notify(id, *player)?;
    }
    if record.sale.is_some() {
        lands.set_sale(id, record.sale.clone())?;
    }
    if record.rent.is_some() {
        lands.set_rent(id, record.rent.clone())?;
    }
    Ok(())
}

/// Outcome of [`load_lands`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    /// Records that could not be loaded, with the reason.
    pub skipped: Vec<(Uuid, String)>,
    /// Lands whose parent could not be attached; they stay roots.
    pub orphans: Vec<Uuid>,
}

/// Rebuild the hierarchy in two passes: every valid record is created as a
/// root first, then parents are attached. Invalid records are skipped and
/// lands with a missing parent stay roots.
pub fn load_lands(lands: &mut Lands, records: &[LandRecord]) -> LoadReport {
    let mut report = LoadReport::default();
    let mut links = Vec::new();

    for record in records {
        match insert(lands, record) {
            Ok(id) => {
                report.loaded += 1;
                if let Some(parent) = record.parent {
                    links.push((id, parent));
                }
            }
            Err(err) => {
                warn!(uuid = %record.uuid, error = %err, "land record skipped");
                report.skipped.push((record.uuid, err.to_string()));
            }
        }
    }

    for (id, parent) in &links {
        match lands.set_parent(*id, Some(*parent)) {
            Ok(()) => {}
            Err(LandsError::ParentNotFound(missing)) => {
                error!(land = %id, parent = %missing, "parent not found, land kept as root");
                report.orphans.push(*id);
            }
            Err(err) => {
                error!(land = %id, error = %err, "parent link rejected, land kept as root");
                report.orphans.push(*id);
            }
        }
    }

    info!(
        loaded = report.loaded,
        skipped = report.skipped.len(),
        orphans = report.orphans.len(),
        "lands loaded"
    );
    report
}

/// Records for every land, sorted by name.
pub fn capture_records(lands: &Lands) -> Vec<LandRecord> {
    lands
        .lands_sorted()
        .into_iter()
        .map(LandRecord::from_land)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{FlagType, FlagValue, Permission, PermissionType};

    fn cuboid(x1: i32, z1: i32, x2: i32, z2: i32) -> Area {
        Area::cuboid("world", x1, 0, z1, x2, 255, z2).unwrap()
    }

    fn sample() -> Lands {
        let mut lands = Lands::default();
        let owner = PlayerContainer::player(Uuid::from_u128(1));
        let town = lands
            .create_land(NewLand::new("town", owner.clone(), cuboid(0, 0, 100, 100)).with_priority(30))
            .unwrap();
        let plot = lands
            .create_land(NewLand::new("plot", owner, cuboid(10, 10, 20, 20)).with_parent(town))
            .unwrap();
        lands.add_area(town, cuboid(200, 200, 210, 210)).unwrap();
        lands
            .add_resident(plot, PlayerContainer::group("builders"))
            .unwrap();
        lands
            .add_permission(
                plot,
                PlayerContainer::Visitor,
                Permission::new(PermissionType::BUILD, false, true),
            )
            .unwrap();
        lands
            .set_flag(
                town,
                Flag::new(
                    FlagType::MESSAGE_JOIN,
                    FlagValue::Str("Welcome, it's town".to_string()),
                    true,
                ),
            )
            .unwrap();
        lands
            .set_sale(
                plot,
                Some(SaleInfo {
                    price: 25.0,
                    sign: None,
                }),
            )
            .unwrap();
        lands
    }

    #[test]
    fn records_reload_to_identical_records() {
        let lands = sample();
        let records = capture_records(&lands);

        let mut restored = Lands::default();
        let report = load_lands(&mut restored, &records);
        assert_eq!(report.loaded, 2);
        assert!(report.skipped.is_empty());
        assert!(report.orphans.is_empty());
        assert_eq!(capture_records(&restored), records);

        let plot = restored.get_land_by_name("plot").unwrap();
        assert_eq!(plot.genealogy(), 1);
        assert_eq!(restored.effective_priority(plot.uuid()), 30);
    }

    #[test]
    fn load_order_does_not_matter() {
        let lands = sample();
        let mut records = capture_records(&lands);
        for _ in 0..2 {
            let mut restored = Lands::default();
            let report = load_lands(&mut restored, &records);
            assert!(report.orphans.is_empty());
            let town = restored.get_land_by_name("town").unwrap();
            assert_eq!(town.children().len(), 1);
            records.reverse();
        }
    }

    #[test]
    fn missing_parent_leaves_an_orphan_root() {
        let lands = sample();
        let records: Vec<LandRecord> = capture_records(&lands)
            .into_iter()
            .filter(|r| r.name == "plot")
            .collect();
        let mut restored = Lands::default();
        let report = load_lands(&mut restored, &records);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.orphans.len(), 1);
        assert!(restored.get_land_by_name("plot").unwrap().parent().is_none());
    }

    #[test]
    fn bad_records_are_skipped() {
        let lands = sample();
        let mut records = capture_records(&lands);
        records[0].areas[0].area = "SPHERE:world:1".to_string();
        let mut no_area = records[1].clone();
        no_area.uuid = Uuid::from_u128(55);
        no_area.name = "empty".to_string();
        no_area.parent = None;
        no_area.areas.clear();
        records.push(no_area);

        let mut restored = Lands::default();
        let report = load_lands(&mut restored, &records);
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(restored.get_land_by_name("empty").is_none());
    }
}
