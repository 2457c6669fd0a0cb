// HoopMetrics favorites command-line entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, not terminal)
// 2. Load config
// 3. Open the cookie jar and build the session reader
// 4. Build the HTTP client, cache, and favorites store
// 5. Run the requested command

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hoopmetrics_core::clock::SystemClock;
use hoopmetrics_core::config;
use hoopmetrics_core::favorites::{
    EntityKey, EntityKind, FavoritesCache, FavoritesSnapshot, FavoritesStore, HttpFavoritesClient,
    Mutation, MutationOutcome, Notice, NoticeLevel, PlayerSummary,
};
use hoopmetrics_core::session::{CookieFileStore, SessionReader, TokenStore};

#[derive(Debug, Parser)]
#[command(name = "hoopmetrics", about = "Manage your HoopMetrics favorites")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show favorite players and teams with plan usage.
    List,
    /// Show the role encoded in the session token.
    Role,
    /// Add a player to favorites.
    AddPlayer { id: i64 },
    /// Remove a player from favorites.
    RemovePlayer { id: i64 },
    /// Add a team to favorites.
    AddTeam { id: i64 },
    /// Remove a team from favorites.
    RemoveTeam { id: i64 },
    /// Store a session token in the cookie jar.
    Login { token: String },
    /// Remove the session token.
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 1. Initialize tracing
    init_tracing()?;
    info!("hoopmetrics starting: {:?}", cli.command);

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!("Config loaded: api={}", config.api.base_url);

    // 3. Session
    let cookie_path = config.cookie_path().context("failed to locate cookie jar")?;
    let jar: Arc<dyn TokenStore> = Arc::new(CookieFileStore::new(&cookie_path));
    let session = SessionReader::new(jar.clone());

    // 4. Store
    let client = HttpFavoritesClient::with_timeout(&config.api.base_url, config.api.timeout())
        .context("failed to build HTTP client")?;
    let ttl_ms = i64::try_from(config.cache.ttl_ms).context("cache.ttl_ms out of range")?;
    let cache = FavoritesCache::new(ttl_ms, Arc::new(SystemClock));
    let store = FavoritesStore::new(Arc::new(client), session, cache);

    // 5. Run
    match cli.command {
        Command::List => list(&store).await,
        Command::Role => {
            let role = store.session().role();
            let tier = if role.is_paid() { "paid" } else { "free" };
            println!("{role} ({tier})");
            Ok(())
        }
        Command::AddPlayer { id } => run_mutation(&store, Mutation::add(EntityKey::player(id))).await,
        Command::RemovePlayer { id } => {
            run_mutation(&store, Mutation::remove(EntityKey::player(id))).await
        }
        Command::AddTeam { id } => run_mutation(&store, Mutation::add(EntityKey::team(id))).await,
        Command::RemoveTeam { id } => run_mutation(&store, Mutation::remove(EntityKey::team(id))).await,
        Command::Login { token } => {
            let token = token.trim();
            if token.is_empty() {
                bail!("token must not be empty");
            }
            jar.set_token(token)
                .with_context(|| format!("failed to write {}", cookie_path.display()))?;
            println!("Logged in as {}.", store.session().role());
            Ok(())
        }
        Command::Logout => {
            jar.clear()
                .with_context(|| format!("failed to update {}", cookie_path.display()))?;
            store.reset();
            println!("Logged out.");
            Ok(())
        }
    }
}

async fn list(store: &FavoritesStore) -> anyhow::Result<()> {
    let mut notices = store.notices();
    let result = store.load().await;
    print_notices(&mut notices);
    let snapshot = result.context("failed to load favorites")?;

    println!(
        "Players ({}){}",
        store.limits_text(EntityKind::Player),
        full_marker(&snapshot, EntityKind::Player)
    );
    for player in &snapshot.players {
        print_player(player);
    }
    println!(
        "Teams ({}){}",
        store.limits_text(EntityKind::Team),
        full_marker(&snapshot, EntityKind::Team)
    );
    for team in &snapshot.teams {
        println!("  {:>6}  {}  {}", team.id, team.full_name, team.abbreviation);
    }
    Ok(())
}

/// Hint that further adds will be refused by the server.
fn full_marker(snapshot: &FavoritesSnapshot, kind: EntityKind) -> &'static str {
    if snapshot.has_room(kind) {
        ""
    } else {
        " [plan limit reached]"
    }
}

fn print_player(player: &PlayerSummary) {
    let team = player.team.as_ref().map(|t| t.name.as_str()).unwrap_or("-");
    let position = player.position.as_deref().unwrap_or("-");
    println!("  {:>6}  {}  {position}  {team}", player.id, player.name);
}

async fn run_mutation(store: &FavoritesStore, mutation: Mutation) -> anyhow::Result<()> {
    let mut notices = store.notices();

    // Ctrl+C cancels; the store still settles if the call already went out.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = store.mutate(mutation, &cancel).await;
    interrupt.abort();
    print_notices(&mut notices);

    match outcome {
        MutationOutcome::Settled => Ok(()),
        MutationOutcome::Cancelled => {
            warn!(key = %mutation.key, "mutation cancelled by user");
            bail!("cancelled")
        }
        MutationOutcome::NoSession => bail!("not logged in; run `hoopmetrics login <token>`"),
        MutationOutcome::RolledBack(e) => Err(e).context(format!("{} failed", mutation.key)),
    }
}

fn print_notices(rx: &mut broadcast::Receiver<Notice>) {
    loop {
        match rx.try_recv() {
            Ok(notice) => match notice.level {
                NoticeLevel::Success => println!("{}", notice.message),
                NoticeLevel::Error => eprintln!("{}", notice.message),
            },
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                warn!("dropped {n} notices");
            }
            Err(_) => break,
        }
    }
}

/// Initialize tracing to write to a log file, not the terminal.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::options()
        .create(true)
        .append(true)
        .open(log_dir.join("hoopmetrics.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("hoopmetrics=info,hoopmetrics_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
