//! approval-chain CLI - drive project approval chains stored in a local sled database

use anyhow::Context;
use approval_chain::{
    config::{self, ChainConfig},
    project::{ProjectDirectory, ProjectRecord, ProjectRole},
    service::{ActiveFilter, SledChainService},
    types::{ChainId, ProjectId, UserId},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "approval-chain")]
#[command(version)]
#[command(about = "Sequential approval chains for projects")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON config file
    #[arg(long, global = true, default_value = "approval-chain.json")]
    config: PathBuf,

    /// Override the database path from the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Manage project statuses
    #[command(subcommand)]
    Status(StatusCommand),

    /// Create an approval chain, replacing the project's active one
    Create {
        project: String,
        /// Approvers in approval order
        #[arg(required = true)]
        approvers: Vec<String>,
        /// Acting user
        #[arg(long = "as")]
        acting: String,
    },

    /// Approve as the current approver and forward to the next
    Approve {
        chain: String,
        #[arg(long = "as")]
        acting: String,
    },

    /// Show the active chain of a project
    Show { project: String },

    /// List chains of a project
    List {
        project: String,
        #[arg(long = "as")]
        acting: String,
        /// Only active chains
        #[arg(long, conflicts_with = "inactive")]
        active: bool,
        /// Only inactive chains
        #[arg(long)]
        inactive: bool,
    },

    /// Delete one or more chains
    Delete {
        #[arg(required = true)]
        chains: Vec<String>,
        #[arg(long = "as")]
        acting: String,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    /// Register a project
    Add {
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
    },
    /// Add a user to a project
    Member {
        project: String,
        user: String,
        /// Grant the manager role
        #[arg(long)]
        manager: bool,
    },
}

#[derive(Subcommand, Debug)]
enum StatusCommand {
    /// Create a status if it does not exist yet
    Ensure { name: String },
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let mut config = config::load_config(&cli.config)?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    run(cli.command, config)
}

fn run(command: Commands, config: ChainConfig) -> anyhow::Result<()> {
    let db = sled::open(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    let service = SledChainService::open(&db, config)?;
    let projects = ProjectDirectory::open(&db)?;

    match command {
        Commands::Project(ProjectCommand::Add { id, name, owner }) => {
            let record = projects.register_project(ProjectRecord::new(
                ProjectId::from(id),
                name,
                UserId::from(owner),
            ))?;
            println!("registered project {}", record.id);
        }
        Commands::Project(ProjectCommand::Member {
            project,
            user,
            manager,
        }) => {
            let role = if manager {
                ProjectRole::Manager
            } else {
                ProjectRole::Member
            };
            projects.add_member(&ProjectId::from(project), &UserId::from(user), role)?;
        }
        Commands::Status(StatusCommand::Ensure { name }) => {
            let id = projects.ensure_status(&name)?;
            println!("{name}: {id}");
        }
        Commands::Create {
            project,
            approvers,
            acting,
        } => {
            let approvers: Vec<UserId> = approvers.into_iter().map(UserId::from).collect();
            let chain = service
                .create(&ProjectId::from(project), &UserId::from(acting), &approvers)
                .context("failed to create approval chain")?;
            print!("{chain}");
        }
        Commands::Approve { chain, acting } => {
            let outcome = service
                .approve_current(&ChainId::from(chain), &UserId::from(acting))
                .context("approval failed")?;
            print!("{}", outcome.chain);
            match outcome.current_approver() {
                Some(next) => println!("waiting on {}", next.user_id),
                None => println!("approval chain completed"),
            }
        }
        Commands::Show { project } => match service.get_active_chain(&ProjectId::from(project))? {
            Some(chain) => print!("{chain}"),
            None => println!("no active approval chain"),
        },
        Commands::List {
            project,
            acting,
            active,
            inactive,
        } => {
            let filter = match (active, inactive) {
                (true, _) => ActiveFilter::Active,
                (_, true) => ActiveFilter::Inactive,
                _ => ActiveFilter::All,
            };
            for chain in
                service.list_chains(&ProjectId::from(project), &UserId::from(acting), filter)?
            {
                print!("{chain}");
            }
        }
        Commands::Delete { chains, acting } => {
            let ids: Vec<ChainId> = chains.into_iter().map(ChainId::from).collect();
            let deleted = service.delete_chains(&ids, &UserId::from(acting))?;
            println!("deleted {deleted} approval chain(s)");
        }
    }

    db.flush()?;
    Ok(())
}
