pub mod bootstrap;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod content;
pub mod credentials;
pub mod daemon;
pub mod gate;
pub mod git;
pub mod guard;
pub mod paths;
pub mod protocol;
pub mod remotes;
pub mod sync;
pub mod task;
pub mod types;

#[cfg(test)]
mod testutil;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use crate::cli::Client;
use crate::cluster::{ClusterRegistry, RegistryTopology};
use crate::config::Settings;
use crate::git::GitCli;
use crate::task::{CycleOutcome, GlobalRepoSyncTask};
use crate::types::{GitCredentials, RemoteName};

#[derive(Parser)]
#[command(
    name = "clustersync",
    about = "Keep the global content repository in sync across cluster nodes"
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync daemon in the foreground
    Daemon,

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Run a sync cycle now
    Sync {
        /// Run in this process instead of asking the daemon
        #[arg(long)]
        local: bool,
    },

    /// List remotes configured in the global repository
    Remotes,

    /// Manage the cluster member registry
    Members {
        #[command(subcommand)]
        command: MembersCommand,
    },

    /// Check dependencies
    Doctor,
}

#[derive(Subcommand)]
enum MembersCommand {
    /// Register or update a member
    Add {
        /// Address the member is known by
        address: String,
        /// Repository URL of the member, may contain /sites/{siteId}
        git_url: String,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Remove a member
    Remove { address: String },

    /// List registered members
    List,
}

#[derive(Args)]
struct AuthArgs {
    #[arg(long, requires = "password", conflicts_with_all = ["token", "private_key_file"])]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,

    #[arg(long, conflicts_with = "private_key_file")]
    token: Option<String>,

    /// File holding the SSH private key peers use for this member
    #[arg(long)]
    private_key_file: Option<PathBuf>,
}

impl AuthArgs {
    fn into_credentials(self) -> Result<GitCredentials, Box<dyn std::error::Error>> {
        if let (Some(username), Some(password)) = (self.username, self.password) {
            return Ok(GitCredentials::Basic { username, password });
        }
        if let Some(token) = self.token {
            return Ok(GitCredentials::Token { token });
        }
        if let Some(path) = self.private_key_file {
            let private_key = std::fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
            return Ok(GitCredentials::PrivateKey { private_key });
        }
        Ok(GitCredentials::None)
    }
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    let result = match cli.command {
        Commands::Daemon => cmd_daemon(config),
        Commands::Stop => cmd_stop(),
        Commands::Status => cli::print_status(),
        Commands::Sync { local } => cmd_sync(config, local),
        Commands::Remotes => cmd_remotes(),
        Commands::Members { command } => cmd_members(config, command),
        Commands::Doctor => cmd_doctor(config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if e.to_string().contains("not running") {
            eprintln!();
            eprintln!("Hint: Start the daemon with: clustersync daemon");
        }
        std::process::exit(1);
    }
}

fn open_registry(settings: &Settings) -> Result<ClusterRegistry, Box<dyn std::error::Error>> {
    let registry = ClusterRegistry::open(&settings.state_db)?;
    registry.init()?;
    Ok(registry)
}

fn cmd_daemon(config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load_or_default(config)?;
    daemon::start(settings)?;
    Ok(())
}

fn cmd_stop() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    client.stop()?;
    println!("Daemon stopping");
    Ok(())
}

fn cmd_sync(config: Option<&Path>, local: bool) -> Result<(), Box<dyn std::error::Error>> {
    let report = if local {
        let settings = Settings::load_or_default(config)?;
        let registry = Arc::new(open_registry(&settings)?);
        let topology = Arc::new(RegistryTopology::new(registry, settings.cluster.clone()));
        GlobalRepoSyncTask::from_settings(&settings, topology).sync_now()
    } else {
        println!("Syncing global repository...");
        Client::connect()?.sync()?
    };

    cli::print_cycle_report(&report);
    match report.outcome {
        CycleOutcome::Completed | CycleOutcome::NotClustered | CycleOutcome::Busy => Ok(()),
        outcome => Err(format!("sync did not complete: {:?}", outcome).into()),
    }
}

fn cmd_remotes() -> Result<(), Box<dyn std::error::Error>> {
    let result = Client::connect()?.remotes()?;
    cli::print_remotes(&result);
    Ok(())
}

fn cmd_members(
    config: Option<&Path>,
    command: MembersCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load_or_default(config)?;
    let registry = open_registry(&settings)?;

    match command {
        MembersCommand::Add {
            address,
            git_url,
            auth,
        } => {
            let remote = RemoteName::for_address(&address)
                .map_err(|e| format!("Invalid address {:?}: {}", address, e))?;
            git::validate_remote_url(&types::global_repo_url(&git_url))
                .map_err(|e| format!("Invalid git url: {}", e))?;
            let auth = auth.into_credentials()?;
            registry.register(&address, &git_url, &auth)?;
            println!("Registered {} as remote {} ({} auth)", address, remote, auth.kind());
        }
        MembersCommand::Remove { address } => {
            if registry.remove(&address)? {
                println!("Removed {}", address);
            } else {
                return Err(format!("No member registered as {}", address).into());
            }
        }
        MembersCommand::List => cli::print_members(&registry.list()?),
    }

    Ok(())
}

fn cmd_doctor(config: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("clustersync System Check\n");

    let git_version = GitCli::new().version();
    println!(
        "[{}] git: {}",
        if git_version.is_some() { "OK" } else { "FAIL" },
        git_version.as_deref().unwrap_or("not found")
    );

    let settings = match Settings::load_or_default(config) {
        Ok(settings) => {
            println!(
                "[OK] Config: {}",
                config
                    .map(Path::to_path_buf)
                    .unwrap_or_else(Settings::default_path)
                    .display()
            );
            Some(settings)
        }
        Err(e) => {
            println!("[FAIL] Config: {}", e);
            None
        }
    };

    let mut registry_ok = false;
    if let Some(settings) = &settings {
        match &settings.cluster {
            Some(cluster) => println!("[OK] Cluster: local node {}", cluster.local_address),
            None => println!("[INFO] Cluster: not configured, cycles will be skipped"),
        }

        let global = settings.repo_paths().global_repo_dir();
        println!(
            "[{}] Global repository: {}",
            if git::repository_exists(&global) { "OK" } else { "INFO" },
            global.display()
        );

        match open_registry(settings).and_then(|r| Ok(r.list()?)) {
            Ok(members) => {
                registry_ok = true;
                println!(
                    "[OK] Member registry: {} ({} members)",
                    settings.state_db.display(),
                    members.len()
                );
            }
            Err(e) => println!("[FAIL] Member registry: {}", e),
        }
    }

    let daemon_running = daemon::is_daemon_running();
    println!(
        "[{}] Daemon: {}",
        if daemon_running { "OK" } else { "INFO" },
        if daemon_running {
            "running"
        } else {
            "not running"
        }
    );

    if git_version.is_none() || settings.is_none() || !registry_ok {
        std::process::exit(1);
    }

    Ok(())
}
