use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collisions::{
    CollisionReport, CollisionRequest, CollisionsManager, CommitOutcome, SharedLands,
};
use crate::config::{DefaultsConfig, EngineConfig};
use crate::economy::{EconomyProvider, FlatRateEconomy, NoEconomy};
use crate::geometry::Area;
use crate::lands::{Land, LandChange, LandId, LandType, Lands};
use crate::permissions::{FlagType, PermissionType, PermissionsRegistry};
use crate::persistence::{self, FlatFileStore, LandStore, LandsSnapshot};
use crate::players::{Player, PlayerContainer};

/// Lands loaded from the store, plus everything needed to change and save them.
pub struct Engine {
    pub config: EngineConfig,
    store: FlatFileStore,
    manager: CollisionsManager,
    changes: broadcast::Receiver<LandChange>,
    /// Saved balances, present when the economy is enabled.
    ledger: Option<Arc<FlatRateEconomy>>,
}

/// Caller choices applied to a mutating request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestFlags {
    /// Queue waivable problems for approval instead of rejecting them.
    pub approve: bool,
    /// Administrator override: nothing is charged.
    pub free: bool,
}

impl RequestFlags {
    fn apply(self, mut request: CollisionRequest) -> CollisionRequest {
        if self.approve {
            request = request.allow_approve();
        }
        if self.free {
            request = request.free();
        }
        request
    }
}

/// Arguments of a new claim, in CLI wire forms.
#[derive(Debug, Clone, Copy)]
pub struct Claim<'a> {
    pub name: &'a str,
    pub owner: &'a str,
    pub area: &'a str,
    pub parent: Option<&'a str>,
    pub land_type: Option<&'a str>,
}

impl Engine {
    /// Build the index from the configured storage directory. Relative paths
    /// in the config are taken from `base`.
    pub async fn open(config: EngineConfig, base: &Path) -> Result<Self, String> {
        let mut lands = Lands::new(PermissionsRegistry::default());
        lands
            .set_default_priority(config.default_priority)
            .map_err(|e| e.to_string())?;

        if let Some(path) = config.defaults_path(base) {
            DefaultsConfig::from_file(&path)?.apply(&mut lands)?;
        }

        let store = FlatFileStore::new(base.join(&config.storage_directory));
        let records = store
            .load_all_lands()
            .map_err(|e| format!("Failed to read lands: {}", e))?;
        let report = persistence::load_lands(&mut lands, &records);
        *lands.approvals_mut() = store
            .load_approvals()
            .map_err(|e| format!("Failed to read approvals: {}", e))?;
        info!(
            loaded = report.loaded,
            skipped = report.skipped.len(),
            orphans = report.orphans.len(),
            approvals = lands.approvals().len(),
            "lands loaded"
        );

        let changes = lands.subscribe();
        let ledger = if config.use_economy {
            let accounts = store
                .load_accounts()
                .map_err(|e| format!("Failed to read accounts: {}", e))?;
            Some(Arc::new(FlatRateEconomy::with_accounts(
                config.price_per_block,
                accounts,
            )))
        } else {
            None
        };
        let economy: Arc<dyn EconomyProvider> = match &ledger {
            Some(ledger) => ledger.clone(),
            None => Arc::new(NoEconomy),
        };
        let shared: SharedLands = Arc::new(RwLock::new(lands));
        let manager = CollisionsManager::new(shared, economy, config.allow_collision);

        Ok(Self {
            config,
            store,
            manager,
            changes,
            ledger,
        })
    }

    pub fn lands(&self) -> &SharedLands {
        self.manager.lands()
    }

    pub fn snapshot_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.config.snapshot_directory)
    }

    /// Write every change made since the last call, the approval queue and
    /// the balances.
    pub async fn persist(&mut self) -> Result<(), String> {
        let lands = self.manager.lands().read().await;
        let written = persistence::drain_changes(&lands, &self.store, &mut self.changes)
            .map_err(|e| format!("Failed to save lands: {}", e))?;
        self.store
            .save_approvals(lands.approvals())
            .map_err(|e| format!("Failed to save approvals: {}", e))?;
        if let Some(ledger) = &self.ledger {
            self.store
                .save_accounts(&ledger.accounts())
                .map_err(|e| format!("Failed to save accounts: {}", e))?;
        }
        info!(changes = written, "store updated");
        Ok(())
    }

    async fn land_id(&self, name: &str) -> Result<LandId, String> {
        self.lands()
            .read()
            .await
            .get_land_by_name(name)
            .map(Land::uuid)
            .ok_or_else(|| format!("Land '{}' not found", name))
    }

    async fn request_for<F>(&self, name: &str, build: F) -> Result<CollisionRequest, String>
    where
        F: FnOnce(&Land, &Lands) -> Result<CollisionRequest, String>,
    {
        let lands = self.lands().read().await;
        let land = lands
            .get_land_by_name(name)
            .ok_or_else(|| format!("Land '{}' not found", name))?;
        build(land, &lands)
    }

    fn ledger(&self) -> Result<&FlatRateEconomy, String> {
        self.ledger
            .as_deref()
            .ok_or_else(|| "The economy is disabled (use_economy = false)".to_string())
    }

    /// Preview the request on the worker, printing progress, then commit it
    /// under the write lock and save the result.
    pub async fn run_request(
        &mut self,
        caller: Uuid,
        request: CollisionRequest,
        flags: RequestFlags,
    ) -> Result<(), String> {
        let request = flags.apply(request);
        let job = self
            .manager
            .submit(caller, request.clone())
            .map_err(|e| e.to_string())?;
        let mut progress = job.progress.clone();

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.progress_interval_ms));
        let wait = job.wait();
        tokio::pin!(wait);
        let preview = loop {
            tokio::select! {
                result = &mut wait => break result.map_err(|e| e.to_string())?,
                _ = ticker.tick() => {
                    let progress = *progress.borrow_and_update();
                    eprintln!("Checking {}: {:?} {}%", request.land_name, progress.state, progress.percent);
                }
            }
        };
        if preview.has_collisions() {
            eprintln!("Preview found {} problem(s)", preview.entries.len());
        }

        let outcome = self
            .manager
            .commit(request)
            .await
            .map_err(|e| e.to_string())?;
        print_outcome(&outcome);
        self.persist().await
    }
}

fn print_report(report: &CollisionReport) {
    for entry in &report.entries {
        println!("  {}", entry);
    }
    if report.price > 0.0 {
        println!("  Price: {:.2}", report.price);
    }
}

fn print_outcome(outcome: &CommitOutcome) {
    match outcome {
        CommitOutcome::Applied { land, .. } => println!("Applied (land {})", land),
        CommitOutcome::Queued { .. } => println!("Queued for approval"),
        CommitOutcome::Rejected { .. } => println!("Rejected"),
    }
    print_report(outcome.report());
}

fn parse_area(wire: &str) -> Result<Area, String> {
    Area::from_wire(wire).map_err(|e| format!("Invalid area '{}': {}", wire, e))
}

pub async fn create(
    engine: &mut Engine,
    caller: Uuid,
    claim: Claim<'_>,
    flags: RequestFlags,
) -> Result<(), String> {
    let owner =
        PlayerContainer::from_wire(claim.owner).map_err(|e| format!("Invalid owner: {}", e))?;
    let mut request = CollisionRequest::land_add(claim.name, owner, parse_area(claim.area)?);
    if let Some(parent) = claim.parent {
        request = request.with_parent(engine.land_id(parent).await?);
    }
    if let Some(land_type) = claim.land_type {
        request = request.with_type(LandType::new(land_type));
    }
    engine.run_request(caller, request, flags).await
}

pub async fn remove(
    engine: &mut Engine,
    caller: Uuid,
    name: &str,
    flags: RequestFlags,
) -> Result<(), String> {
    let request = engine
        .request_for(name, |land, _| Ok(CollisionRequest::land_remove(land)))
        .await?;
    engine.run_request(caller, request, flags).await
}

pub async fn area_add(
    engine: &mut Engine,
    caller: Uuid,
    name: &str,
    area: &str,
    flags: RequestFlags,
) -> Result<(), String> {
    let area = parse_area(area)?;
    let request = engine
        .request_for(name, |land, _| Ok(CollisionRequest::area_add(land, area)))
        .await?;
    engine.run_request(caller, request, flags).await
}

pub async fn area_modify(
    engine: &mut Engine,
    caller: Uuid,
    name: &str,
    area_id: u32,
    area: &str,
    flags: RequestFlags,
) -> Result<(), String> {
    let area = parse_area(area)?;
    let request = engine
        .request_for(name, |land, _| Ok(CollisionRequest::area_modify(land, area_id, area)))
        .await?;
    engine.run_request(caller, request, flags).await
}

pub async fn area_remove(
    engine: &mut Engine,
    caller: Uuid,
    name: &str,
    area_id: u32,
    flags: RequestFlags,
) -> Result<(), String> {
    let request = engine
        .request_for(name, |land, _| Ok(CollisionRequest::area_remove(land, area_id)))
        .await?;
    engine.run_request(caller, request, flags).await
}

pub async fn set_parent(
    engine: &mut Engine,
    caller: Uuid,
    name: &str,
    parent: Option<&str>,
    flags: RequestFlags,
) -> Result<(), String> {
    let request = engine
        .request_for(name, |land, lands| {
            let parent = match parent {
                Some(parent) => Some(
                    lands
                        .get_land_by_name(parent)
                        .map(Land::uuid)
                        .ok_or_else(|| format!("Land '{}' not found", parent))?,
                ),
                None => None,
            };
            Ok(CollisionRequest::land_parent(land, parent))
        })
        .await?;
    engine.run_request(caller, request, flags).await
}

/// Credit a player's account and save the ledger.
pub async fn deposit(engine: &mut Engine, player: Uuid, amount: f64) -> Result<(), String> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(format!("Invalid amount {}", amount));
    }
    let ledger = engine.ledger()?;
    ledger.deposit(player, amount);
    let balance = ledger.balance(&PlayerContainer::player(player)).unwrap_or(0.0);
    info!(%player, amount, balance, "deposit");
    println!("{} now has {:.2}", player, balance);
    engine.persist().await
}

pub fn balance(engine: &Engine, player: Uuid) -> Result<(), String> {
    let balance = engine
        .ledger()?
        .balance(&PlayerContainer::player(player))
        .unwrap_or(0.0);
    println!("{}: {:.2}", player, balance);
    Ok(())
}

pub async fn list(engine: &Engine) {
    let lands = engine.lands().read().await;
    if lands.is_empty() {
        println!("No lands");
        return;
    }
    println!("{:<24} {:<12} {:>8} {:>6} {:<24}", "Name", "World", "Priority", "Areas", "Owner");
    println!("{}", "-".repeat(78));
    for land in lands.lands_sorted() {
        let indent = "  ".repeat(land.genealogy() as usize);
        println!(
            "{:<24} {:<12} {:>8} {:>6} {:<24}",
            format!("{}{}", indent, land.name()),
            land.world(),
            lands.effective_priority(land.uuid()),
            land.areas().len(),
            land.owner().to_wire()
        );
    }
    println!("\n{} land(s)", lands.len());
}

pub async fn info(engine: &Engine, name: &str) -> Result<(), String> {
    let lands = engine.lands().read().await;
    let land = lands
        .get_land_by_name(name)
        .ok_or_else(|| format!("Land '{}' not found", name))?;

    println!("=== Land {} ===", land.name());
    println!("UUID: {}", land.uuid());
    println!("World: {}", land.world());
    if let Some(land_type) = land.land_type() {
        println!("Type: {}", land_type.name());
    }
    println!("Owner: {}", land.owner().to_wire());
    if let Some(parent) = land.parent().and_then(|p| lands.get_land(p)) {
        println!("Parent: {}", parent.name());
    }
    let children: Vec<_> = land
        .children()
        .iter()
        .filter_map(|c| lands.get_land(*c))
        .map(Land::name)
        .collect();
    if !children.is_empty() {
        println!("Children: {}", children.join(", "));
    }
    println!(
        "Priority: {} (effective {})",
        land.priority(),
        lands.effective_priority(land.uuid())
    );
    println!("Volume: {} blocks", land.volume());
    println!();
    println!("--- Areas ---");
    for (id, area) in land.areas() {
        println!("  {}: {}", id, area.to_wire());
    }
    if !land.residents().is_empty() {
        println!("--- Residents ---");
        for resident in land.residents() {
            println!("  {}", resident.to_wire());
        }
    }
    if !land.banned().is_empty() {
        println!("--- Banned ---");
        for banned in land.banned() {
            println!("  {}", banned.to_wire());
        }
    }
    let settings = land.settings();
    if !settings.is_empty() {
        println!("--- Settings ---");
        for wire in settings.permission_wires() {
            println!("  {}", wire);
        }
        for wire in settings.flag_wires() {
            println!("  {}", wire);
        }
    }
    if let Some(sale) = land.sale() {
        println!("For sale: {:.2}", sale.price);
    }
    if let Some(rent) = land.rent() {
        println!(
            "For rent: {:.2} every {} day(s){}",
            rent.price,
            rent.renew_days,
            if rent.is_rented() { " (rented)" } else { "" }
        );
    }
    Ok(())
}

/// Show which land covers a block, and optionally resolve one permission or
/// flag there.
pub async fn at(
    engine: &Engine,
    world: &str,
    pos: (i32, i32, i32),
    player: Option<Uuid>,
    permission: Option<&str>,
    flag: Option<&str>,
) -> Result<(), String> {
    let (x, y, z) = pos;
    let lands = engine.lands().read().await;
    let covering = lands.get_lands_at(world, x, y, z);
    match lands.get_land_at(world, x, y, z) {
        Some(land) => println!("{} {},{},{} is in land {}", world, x, y, z, land.name()),
        None => println!("{} {},{},{} is outside any land", world, x, y, z),
    }
    if covering.len() > 1 {
        let names: Vec<_> = covering.iter().map(|l| l.name()).collect();
        println!("Covered by: {}", names.join(", "));
    }
    if let Some(perm) = permission {
        let player = Player::new(player.unwrap_or(Uuid::nil()), "console");
        let allowed =
            lands.check_permission_at(world, x, y, z, &player, &PermissionType::new(perm));
        println!("{} for {}: {}", perm.to_uppercase(), player.uuid, allowed);
    }
    if let Some(flag) = flag {
        let value = lands.flag_at(world, x, y, z, &FlagType::new(flag));
        println!("{}: {}", flag.to_uppercase(), value.to_wire());
    }
    Ok(())
}

pub async fn approvals_list(engine: &Engine) {
    let lands = engine.lands().read().await;
    let approvals = lands.approvals();
    if approvals.is_empty() {
        println!("No pending approvals");
        return;
    }
    println!("{:<24} {:<12} {:>10} {:>12}", "Land", "Action", "Price", "Created");
    println!("{}", "-".repeat(62));
    for approve in approvals.list() {
        println!(
            "{:<24} {:<12} {:>10.2} {:>12}",
            approve.land_name(),
            format!("{:?}", approve.request.action),
            approve.price,
            approve.created_at
        );
    }
}

pub async fn approvals_accept(engine: &mut Engine, name: &str) -> Result<(), String> {
    let outcome = engine
        .manager
        .accept_approval(name)
        .await
        .map_err(|e| e.to_string())?;
    print_outcome(&outcome);
    engine.persist().await
}

pub async fn approvals_reject(engine: &mut Engine, name: &str) -> Result<(), String> {
    let approve = engine
        .manager
        .reject_approval(name)
        .await
        .map_err(|e| e.to_string())?;
    println!("Rejected request for {}", approve.land_name());
    engine.persist().await
}

pub async fn snapshot_save(engine: &Engine, snapshot_dir: &Path) -> Result<(), String> {
    let lands = engine.lands().read().await;
    let path = persistence::save_snapshot(&lands, snapshot_dir)
        .map_err(|e| format!("Cannot save snapshot: {}", e))?;
    println!("Snapshot saved to {}", path.display());
    match persistence::prune_snapshots(snapshot_dir, engine.config.max_snapshots as usize) {
        Ok(deleted) if !deleted.is_empty() => println!("Pruned {} old snapshot(s)", deleted.len()),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "snapshot pruning failed"),
    }
    Ok(())
}

pub fn snapshot_list(snapshot_dir: &Path) -> Result<(), String> {
    let snapshots = persistence::list_snapshots(snapshot_dir)
        .map_err(|e| format!("Error listing snapshots: {}", e))?;
    if snapshots.is_empty() {
        println!("No snapshots found in {}", snapshot_dir.display());
        return Ok(());
    }
    println!("{:<40} {:>8} {:>12}", "File", "Lands", "Size");
    println!("{}", "-".repeat(62));
    for s in &snapshots {
        let name = s
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("?");
        println!("{:<40} {:>8} {:>9} KB", name, s.land_count, s.file_size / 1024);
    }
    println!("\n{} snapshot(s) in {}", snapshots.len(), snapshot_dir.display());
    Ok(())
}

/// Replace the stored lands with a snapshot: the given file, or the newest
/// readable one in `snapshot_dir`.
pub async fn snapshot_restore(
    engine: &mut Engine,
    snapshot_dir: &Path,
    file: Option<&Path>,
) -> Result<(), String> {
    let snapshot: LandsSnapshot = match file {
        Some(path) => persistence::load_snapshot(path),
        None => persistence::load_latest_valid_snapshot(snapshot_dir),
    }
    .map_err(|e| format!("Error restoring snapshot: {}", e))?;

    {
        let mut lands = engine.lands().write().await;
        let report = snapshot.restore(&mut lands);
        for (uuid, reason) in &report.skipped {
            eprintln!("Skipped {}: {}", uuid, reason);
        }
        println!(
            "Restored {} land(s), {} approval(s)",
            report.loaded,
            lands.approvals().len()
        );
    }
    // The restore can outrun the change channel, so rewrite everything.
    let lands = engine.lands().read().await;
    persistence::resync(&lands, &engine.store).map_err(|e| format!("Failed to save lands: {}", e))?;
    drop(lands);
    engine.changes = engine.changes.resubscribe();
    Ok(())
}
