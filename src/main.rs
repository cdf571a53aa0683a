use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use claimguard::cli::{self, commands};
use claimguard::cli::commands::{Claim, RequestFlags};
use claimguard::config::EngineConfig;

#[derive(Parser)]
#[command(name = "claimguard")]
#[command(about = "Land claims with nested hierarchy, collision checks and permission resolution")]
#[command(version)]
struct Cli {
    /// Path to the configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// UUID of the player issuing the command
    #[arg(long = "as", default_value_t = Uuid::nil())]
    caller: Uuid,

    /// Administrator override: claims and area changes are not charged
    #[arg(long, global = true)]
    free: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Claim a new land
    Create {
        name: String,
        /// Area wire form, e.g. CUBOID:world:0:0:0:15:255:15
        area: String,
        /// Owner container, e.g. PLAYER:<uuid> or GROUP:<name>
        #[arg(short, long)]
        owner: String,
        /// Parent land name
        #[arg(short, long)]
        parent: Option<String>,
        /// Land type selecting type-level default settings
        #[arg(short = 't', long = "type")]
        land_type: Option<String>,
        /// Queue the claim for approval instead of rejecting it on collision
        #[arg(long)]
        approve: bool,
    },

    /// Remove a land without children
    Remove {
        name: String,
        #[arg(long)]
        approve: bool,
    },

    /// Add, change or remove areas of a land
    Area {
        #[command(subcommand)]
        action: AreaAction,
    },

    /// Move a land under another parent, or make it a root with no parent given
    Parent {
        name: String,
        parent: Option<String>,
        /// Queue the change for approval instead of rejecting it on collision
        #[arg(long)]
        approve: bool,
    },

    /// List all lands
    List,

    /// Show one land
    Info { name: String },

    /// Show the land at a block and resolve a permission or flag there
    At {
        world: String,
        x: i32,
        y: i32,
        z: i32,
        /// Player to check the permission for
        #[arg(long)]
        player: Option<Uuid>,
        #[arg(long)]
        permission: Option<String>,
        #[arg(long)]
        flag: Option<String>,
    },

    /// Manage requests waiting for approval
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },

    /// Manage land snapshots
    Snapshots {
        #[command(subcommand)]
        action: SnapshotAction,
    },

    /// Player balances used to pay for claims
    Economy {
        #[command(subcommand)]
        action: EconomyAction,
    },
}

#[derive(Subcommand)]
enum AreaAction {
    Add {
        name: String,
        area: String,
        #[arg(long)]
        approve: bool,
    },
    Modify {
        name: String,
        id: u32,
        area: String,
        #[arg(long)]
        approve: bool,
    },
    Remove {
        name: String,
        id: u32,
        #[arg(long)]
        approve: bool,
    },
}

#[derive(Subcommand)]
enum EconomyAction {
    /// Credit a player's account
    Deposit { player: Uuid, amount: f64 },
    /// Show a player's balance
    Balance { player: Uuid },
}

#[derive(Subcommand)]
enum ApprovalAction {
    List,
    Accept { name: String },
    Reject { name: String },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Save a snapshot of every land
    Save,
    /// List available snapshots
    List,
    /// Replace all lands with a snapshot, the newest one by default
    Restore { file: Option<String> },
}

fn load_config(path: Option<&str>) -> (EngineConfig, PathBuf) {
    let Some(path) = path else {
        return (EngineConfig::default(), PathBuf::from("."));
    };
    let path = Path::new(path);
    match EngineConfig::from_file(path) {
        Ok(config) => {
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (config, base)
        }
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let (config, base) = load_config(cli.config.as_deref());
    cli::init_logging(&config);

    if let Commands::Snapshots {
        action: SnapshotAction::List,
    } = &cli.command
    {
        if let Err(e) = commands::snapshot_list(&base.join(&config.snapshot_directory)) {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        return;
    }

    let mut engine = match commands::Engine::open(config, &base).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error loading lands: {}", e);
            std::process::exit(1);
        }
    };
    let caller = cli.caller;
    let snapshot_dir = engine.snapshot_dir(&base);
    let free = cli.free;
    let flags = move |approve: bool| RequestFlags { approve, free };

    let result = match cli.command {
        Commands::Create {
            name,
            area,
            owner,
            parent,
            land_type,
            approve,
        } => {
            let claim = Claim {
                name: &name,
                owner: &owner,
                area: &area,
                parent: parent.as_deref(),
                land_type: land_type.as_deref(),
            };
            commands::create(&mut engine, caller, claim, flags(approve)).await
        }
        Commands::Remove { name, approve } => {
            commands::remove(&mut engine, caller, &name, flags(approve)).await
        }
        Commands::Area { action } => match action {
            AreaAction::Add {
                name,
                area,
                approve,
            } => commands::area_add(&mut engine, caller, &name, &area, flags(approve)).await,
            AreaAction::Modify {
                name,
                id,
                area,
                approve,
            } => {
                commands::area_modify(&mut engine, caller, &name, id, &area, flags(approve)).await
            }
            AreaAction::Remove { name, id, approve } => {
                commands::area_remove(&mut engine, caller, &name, id, flags(approve)).await
            }
        },
        Commands::Parent {
            name,
            parent,
            approve,
        } => {
            commands::set_parent(&mut engine, caller, &name, parent.as_deref(), flags(approve))
                .await
        }
        Commands::List => {
            commands::list(&engine).await;
            Ok(())
        }
        Commands::Info { name } => commands::info(&engine, &name).await,
        Commands::At {
            world,
            x,
            y,
            z,
            player,
            permission,
            flag,
        } => {
            commands::at(
                &engine,
                &world,
                (x, y, z),
                player,
                permission.as_deref(),
                flag.as_deref(),
            )
            .await
        }
        Commands::Approvals { action } => match action {
            ApprovalAction::List => {
                commands::approvals_list(&engine).await;
                Ok(())
            }
            ApprovalAction::Accept { name } => commands::approvals_accept(&mut engine, &name).await,
            ApprovalAction::Reject { name } => commands::approvals_reject(&mut engine, &name).await,
        },
        Commands::Snapshots { action } => match action {
            SnapshotAction::Save => commands::snapshot_save(&engine, &snapshot_dir).await,
            SnapshotAction::List => commands::snapshot_list(&snapshot_dir),
            SnapshotAction::Restore { file } => {
                commands::snapshot_restore(
                    &mut engine,
                    &snapshot_dir,
                    file.as_deref().map(Path::new),
                )
                .await
            }
        },
        Commands::Economy { action } => match action {
            EconomyAction::Deposit { player, amount } => {
                commands::deposit(&mut engine, player, amount).await
            }
            EconomyAction::Balance { player } => commands::balance(&engine, player),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
