use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tastebud_core::catalog::StaticCatalog;
use tastebud_core::credentials::{CredentialBus, EnvCredentialStore};
use tastebud_core::domain::{MediaType, SessionKey};
use tastebud_core::engine::{EngineConfig, SessionEngine};
use tastebud_core::storage::{
    HistoryStore, MemoryHistoryStore, MemoryRoundLock, PgHistoryStore, PgRoundLock, RoundLock,
};

#[derive(Debug, Parser)]
#[command(name = "tastebud_worker")]
struct Args {
    /// Whose session to run the round for.
    #[arg(long, default_value = "local")]
    user: String,

    /// song, movie, book, tv_show or video_game.
    #[arg(long)]
    media_type: MediaType,

    /// JSON array of tagged media items. Falls back to FAVORITES_PATH.
    #[arg(long)]
    favorites: Option<PathBuf>,

    /// Extra instruction appended to the prompt; repeatable.
    #[arg(long = "constraint")]
    constraints: Vec<String>,

    /// Print the composed messages without calling the model.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tastebud_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let key = SessionKey::new(args.user, args.media_type);

    let favorites = args
        .favorites
        .or_else(|| settings.favorites_path.as_deref().map(PathBuf::from));
    let catalog = match favorites {
        Some(path) => StaticCatalog::from_json_file(&path)?,
        None => StaticCatalog::new(),
    };

    let (store, rounds): (Arc<dyn HistoryStore>, Arc<dyn RoundLock>) =
        match settings.database_url.as_deref() {
            Some(db_url) if !args.dry_run => {
                let pool = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(2)
                    .connect(db_url)
                    .await
                    .context("connect DATABASE_URL failed")?;
                tastebud_core::storage::migrate(&pool).await?;
                (
                    Arc::new(PgHistoryStore::new(pool.clone())),
                    Arc::new(PgRoundLock::new(pool)),
                )
            }
            _ => (
                Arc::new(MemoryHistoryStore::new()),
                Arc::new(MemoryRoundLock::new()),
            ),
        };

    let bus = CredentialBus::new();
    let provider = settings.provider()?;
    let llm = tastebud_core::llm::client_from_env(
        provider,
        Arc::new(EnvCredentialStore::from_settings(&settings)),
        &bus,
    )?;
    let engine = SessionEngine::new(
        llm,
        store,
        Arc::new(catalog),
        EngineConfig::from_settings(&settings),
    )
    .with_round_lock(rounds);
    engine.set_constraints(&key, args.constraints).await;

    if args.dry_run {
        let messages = engine.preview_messages(&key).await?;
        tracing::info!(session = %key, %provider, messages = messages.len(), "dry run");
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    match engine.request_suggestion(&key).await {
        Ok(suggestion) => {
            tracing::info!(session = %key, id = %suggestion.id, "round finished");
            println!("{}", serde_json::to_string_pretty(&suggestion)?);
            Ok(())
        }
        Err(err) => {
            tracing::error!(session = %key, error = %err, kind = err.kind(), "round failed");
            let message = err.user_message();
            let err = anyhow::Error::new(err).context(message);
            sentry_anyhow::capture_anyhow(&err);
            Err(err)
        }
    }
}

fn init_sentry(settings: &tastebud_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
