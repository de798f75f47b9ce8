use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use nudge_bot::{Bot, BotBuilder};
use nudge_core::write_text_atomic;
use nudge_endpoint::{delivered_ledger_name, Endpoint, EventSource, ScopesCollector};
use nudge_github::{
    AddReviewerOnRfr, AlertOnMentionedUser, AlertOnMergedEvent, GithubApiClient, GithubClient,
    GithubEndpoint, GithubEventSource, GithubScopesCollector, IssueStatistics, PullRequestReport,
    PullRequestStatistics, RepositoryStatistics, GITHUB_ENDPOINT_KEY,
};
use nudge_irc::{
    AnswerMentions, ChatConnection, ChatNotifier, IrcEndpoint, IrcEventSource, TcpChatConnection,
};
use nudge_statistics::StatisticsSnapshot;
use nudge_store::{CachedStack, DocumentStore, InMemoryDocumentStore, SqliteDocumentStore};
use nudge_tasks::{LogNotifier, Notifier};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cli_types::{Cli, Command};
use crate::config::{load_config, read_config, NudgebotConfig, CONFIG_FILE_NAME, CONFIG_TEMPLATE};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run(args) => run_bot(&args.config).await,
        Command::Init(args) => {
            let path = init_project(&args.dir, args.force)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Command::Stats(args) => {
            let config = read_config(&args.config.config)?;
            let store = open_store(&config)?;
            let value = statistics_json(store.as_ref(), args.collection.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Command::Ledger(args) => {
            let config = read_config(&args.config)?;
            let store = open_store(&config)?;
            let value = ledger_json(store, &config).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}

/// Writes the configuration template into `dir`, refusing to replace an
/// existing file unless `force` is set.
pub(crate) fn init_project(dir: &Path, force: bool) -> Result<PathBuf> {
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }
    write_text_atomic(&path, CONFIG_TEMPLATE)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub(crate) fn open_store(config: &NudgebotConfig) -> Result<Arc<dyn DocumentStore>> {
    match &config.bot.store_path {
        Some(path) => {
            let store = SqliteDocumentStore::new(path)
                .with_context(|| format!("failed to open store {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("no bot.store_path configured; state is kept in memory only");
            Ok(Arc::new(InMemoryDocumentStore::new()))
        }
    }
}

/// Registers the GitHub endpoint with its built-in statistics, the reviewer
/// task, the alerts when `[alerts]` names a target and one report per
/// `[[periodic]]` entry. A chat connection adds the chat endpoint and its
/// mention replies.
pub(crate) async fn build_bot(
    config: &NudgebotConfig,
    client: Arc<dyn GithubClient>,
    chat: Option<Arc<dyn ChatConnection>>,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
) -> Result<Bot> {
    let users = Arc::new(config.user_directory());
    let endpoint: Arc<dyn Endpoint> = Arc::new(GithubEndpoint::new(Arc::clone(&client)));
    let events: Arc<dyn EventSource> = Arc::new(GithubEventSource::new(
        Arc::clone(&client),
        config.github.username.clone(),
        config.github.repositories.clone(),
        config.github.max_recent_check,
    ));
    let collector: Arc<dyn ScopesCollector> = Arc::new(GithubScopesCollector::new(
        Arc::clone(&client),
        config.github.repositories.clone(),
    ));

    let mut builder = BotBuilder::new()
        .store(store)
        .notifier(notifier)
        .config(config.bot_config())
        .endpoint(endpoint, events, Some(collector))
        .statistics(Arc::new(RepositoryStatistics::new(Arc::clone(&client))))
        .statistics(Arc::new(PullRequestStatistics::new(Arc::clone(&client))))
        .statistics(Arc::new(IssueStatistics));

    let mut reviewer = AddReviewerOnRfr::new(Arc::clone(&client), config.github.clone());
    if let Some(target) = &config.alerts.chat_target {
        reviewer = reviewer.with_announcement(target.clone(), Arc::clone(&users));
        builder = builder
            .task(Arc::new(AlertOnMergedEvent::new(target.clone(), Arc::clone(&users))))
            .task(Arc::new(AlertOnMentionedUser::new(target.clone(), Arc::clone(&users))));
    }
    builder = builder.task(Arc::new(reviewer));

    if let Some(connection) = chat {
        let endpoint: Arc<dyn Endpoint> = Arc::new(IrcEndpoint);
        let events: Arc<dyn EventSource> = Arc::new(IrcEventSource::new(Arc::clone(&connection)));
        builder = builder
            .endpoint(endpoint, events, None)
            .task(Arc::new(AnswerMentions::new(connection.nick())));
    }

    let maintainers = config.maintainers();
    for entry in &config.periodic {
        builder = builder.periodic_task(Arc::new(
            PullRequestReport::new(entry.name.clone(), entry.schedule(), entry.delivery())
                .with_users(Arc::clone(&users), maintainers.clone()),
        ));
    }
    builder.build().await.context("failed to build bot")
}

async fn run_bot(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let client: Arc<dyn GithubClient> = Arc::new(
        GithubApiClient::new(&config.github).context("failed to create github client")?,
    );
    let (chat, notifier): (Option<Arc<dyn ChatConnection>>, Arc<dyn Notifier>) =
        match &config.irc {
            Some(settings) => {
                let connection: Arc<dyn ChatConnection> = Arc::new(
                    TcpChatConnection::connect(settings)
                        .await
                        .context("failed to connect to chat server")?,
                );
                let notifier = ChatNotifier::new(Arc::clone(&connection))
                    .with_email_fallback(Arc::new(LogNotifier));
                (Some(connection), Arc::new(notifier))
            }
            None => (None, Arc::new(LogNotifier)),
        };
    let bot = build_bot(&config, client, chat, store, notifier).await?;
    info!(
        repositories = config.github.repositories.len(),
        chat = config.irc.is_some(),
        users = config.users.len(),
        periodic = config.periodic.len(),
        "nudgebot started"
    );

    tokio::select! {
        result = bot.run() => result.context("bot stopped"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown requested");
            Ok(())
        }
    }
}

pub(crate) async fn statistics_json(
    store: &dyn DocumentStore,
    collection: Option<&str>,
) -> Result<Value> {
    let snapshot = StatisticsSnapshot::load(store)
        .await
        .context("failed to load statistics")?;
    Ok(match collection {
        Some(name) => json!(snapshot.collection(name)),
        None => snapshot.to_value(),
    })
}

pub(crate) async fn ledger_json(
    store: Arc<dyn DocumentStore>,
    config: &NudgebotConfig,
) -> Result<Value> {
    let ledger = CachedStack::open(
        store,
        delivered_ledger_name(GITHUB_ENDPOINT_KEY),
        Some(config.bot.delivered_ledger_length),
    )
    .await
    .context("failed to open delivered ledger")?;
    let items = ledger.items().await.context("failed to read delivered ledger")?;
    Ok(json!(items))
}
