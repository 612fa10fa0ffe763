use std::net::SocketAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use depot::config::Config;
use depot::crypto::random_hex_key;
use depot::db::{AppState, queries};
use depot::models::ApiAccess;
use depot::sync::{self, RemoteUpdateStatus};
use depot::{license, nonce};

#[derive(Parser)]
#[command(name = "depot", about = "Self-hosted package distribution server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve,
    /// Expire overdue licenses and purge stale nonces
    Sweep,
    /// Download or refresh a package archive from the VCS host
    Sync {
        slug: String,
        /// Re-download even when the local copy is current, clearing any held lock
        #[arg(long)]
        force: bool,
    },
    /// Manage API credentials for the request-signature protocol
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Create a credential and print its generated secret
    Add {
        key_id: String,
        /// License API access grants (all, browse, read, edit, add, delete, other)
        #[arg(long, value_delimiter = ',')]
        access: Vec<String>,
    },
    List,
    Remove {
        key_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "depot=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Sweep => sweep(config),
        Command::Sync { slug, force } => sync_package(config, slug, force).await,
        Command::Credential { action } => credential(config, action),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let addr = config.addr();
    let state = AppState::new(config).context("failed to initialize application state")?;
    let app = depot::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")
}

fn sweep(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(config).context("failed to initialize application state")?;
    let conn = state.db.get()?;

    let expired = license::switch_expired_licenses(&conn)?;
    let purged = nonce::cleanup(&conn)?;

    info!(expired, purged, "sweep finished");
    println!("{} licenses expired, {} nonces purged", expired, purged);
    Ok(())
}

async fn sync_package(config: Config, slug: String, force: bool) -> anyhow::Result<()> {
    let state = AppState::new(config).context("failed to initialize application state")?;

    let local = sync::find_package(&state, &slug, false).await?;

    if !force {
        match sync::check_remote_update(&state, local.as_ref()).await? {
            RemoteUpdateStatus::UpToDate => {
                println!("{} is up to date", slug);
                return Ok(());
            }
            RemoteUpdateStatus::UpdateAvailable { remote_version } => {
                println!("{}: remote has {}", slug, remote_version);
            }
            RemoteUpdateStatus::NoLocalPackage => {}
        }
    }

    if sync::sync_from_remote(&state, &slug, force).await? {
        println!("synced {}", slug);
    } else {
        println!("skipped {}: sync lock held or slug rejected by policy", slug);
    }

    Ok(())
}

fn credential(config: Config, action: CredentialAction) -> anyhow::Result<()> {
    let state = AppState::new(config).context("failed to initialize application state")?;
    let conn = state.db.get()?;

    match action {
        CredentialAction::Add { key_id, access } => {
            let access: Vec<ApiAccess> = access
                .iter()
                .map(|a| {
                    a.parse()
                        .map_err(|_| anyhow::anyhow!("unknown access grant: {}", a))
                })
                .collect::<anyhow::Result<_>>()?;

            let secret = random_hex_key();
            queries::create_credential(&conn, &key_id, &secret, &access)?;

            println!("key_id: {}", key_id);
            println!("secret: {}", secret);
        }
        CredentialAction::List => {
            for credential in queries::list_credentials(&conn)? {
                let access: Vec<&str> = credential.access.iter().map(|a| a.as_ref()).collect();
                println!(
                    "{}\tcreated {}\taccess: [{}]",
                    credential.key_id,
                    credential.created_at,
                    access.join(", "),
                );
            }
        }
        CredentialAction::Remove { key_id } => {
            if queries::delete_credential(&conn, &key_id)? {
                println!("removed {}", key_id);
            } else {
                println!("no credential named {}", key_id);
            }
        }
    }

    Ok(())
}
