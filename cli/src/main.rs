//! Ops CLI for codex-switch.
//!
//! A thin consumer of the command facade: every subcommand is a direct call
//! into [`codex_switch_core::AppContext`]. It performs no business logic of
//! its own. Errors are rendered via their `Display` impl; successes are
//! rendered as pretty JSON.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use codex_switch_core::core::config::{self, RuntimeConfig};
use codex_switch_core::AppContext;
use serde_json::json;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "codex-switch", about = "Manage multiple codex CLI credentials")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Override the application data directory.
    #[arg(long, global = true, env = "CODEX_SWITCH_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Vault lifecycle management.
    Vault {
        #[command(subcommand)]
        action: VaultAction,
    },
    /// Registered account management.
    Account {
        #[command(subcommand)]
        action: AccountAction,
    },
    /// Switch the live auth file to a different account.
    Switch {
        id: Uuid,
        #[arg(long)]
        restart: bool,
    },
    /// Restore the live auth file from a previous switch's snapshot.
    Rollback { history_id: Uuid },
    /// Quota probing.
    Quota {
        #[command(subcommand)]
        action: QuotaAction,
    },
    /// Runtime diagnostics and CLI process status.
    Diagnostics,
}

#[derive(Subcommand)]
enum VaultAction {
    Init {
        #[arg(long)]
        password: String,
    },
    Unlock {
        #[arg(long)]
        password: String,
    },
    Lock,
    Status,
}

#[derive(Subcommand)]
enum AccountAction {
    ImportFile {
        path: PathBuf,
        #[arg(long, default_value = "")]
        name: String,
    },
    List,
    Delete {
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum QuotaAction {
    Refresh {
        id: Option<Uuid>,
        #[arg(long)]
        force: bool,
    },
    Dashboard,
}

fn init_telemetry() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

fn print_success<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render output: {e}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();
    let cli = Cli::parse();

    let app_data_dir = cli
        .data_dir
        .or_else(config::default_app_data_dir)
        .ok_or_else(|| anyhow::anyhow!("could not determine application data directory"))?;

    let mut config = RuntimeConfig::load(&app_data_dir);
    config.paths.app_data_dir = app_data_dir;
    config.normalize();

    let ctx = AppContext::new(config).await?;

    let result = run(&ctx, cli.command).await;

    if let Err(e) = &result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }

    Ok(())
}

async fn run(ctx: &AppContext, command: Command) -> Result<(), codex_switch_core::CoreError> {
    match command {
        Command::Vault { action } => match action {
            VaultAction::Init { password } => {
                ctx.init_vault(&password).await?;
                print_success(&json!({"status": "initialized"}));
            },
            VaultAction::Unlock { password } => {
                ctx.unlock_vault(&password).await?;
                print_success(&json!({"status": "unlocked"}));
            },
            VaultAction::Lock => {
                ctx.lock_vault().await?;
                print_success(&json!({"status": "locked"}));
            },
            VaultAction::Status => {
                print_success(&json!({"status": format!("{:?}", ctx.vault_status().await)}));
            },
        },
        Command::Account { action } => match action {
            AccountAction::ImportFile { path, name } => {
                let id = ctx.import_from_file(&path, &name, &[]).await?;
                print_success(&json!({"account_id": id}));
            },
            AccountAction::List => {
                let accounts = ctx.list_accounts().await?;
                print_success(&accounts);
            },
            AccountAction::Delete { id } => {
                ctx.delete_account(id).await?;
                print_success(&json!({"status": "deleted"}));
            },
        },
        Command::Switch { id, restart } => {
            let history_id = ctx.switch_account(id, restart).await?;
            print_success(&json!({"history_id": history_id}));
        },
        Command::Rollback { history_id } => {
            let new_id = ctx.rollback(history_id).await?;
            print_success(&json!({"history_id": new_id}));
        },
        Command::Quota { action } => match action {
            QuotaAction::Refresh { id, force } => {
                let snapshots = ctx.refresh_quota(id, force).await?;
                print_success(&snapshots);
            },
            QuotaAction::Dashboard => {
                let snapshots = ctx.quota_dashboard().await?;
                print_success(&snapshots);
            },
        },
        Command::Diagnostics => {
            let diagnostics = ctx.get_runtime_diagnostics().await?;
            print_success(&diagnostics);
        },
    }
    Ok(())
}
