use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Log targets that follow `--log-level`. Dependencies such as `reqwest`,
/// `hyper` and `rusqlite` stay at `warn`.
const NUDGEBOT_TARGETS: [&str; 9] = [
    "nudgebot",
    "nudge_core",
    "nudge_store",
    "nudge_endpoint",
    "nudge_statistics",
    "nudge_tasks",
    "nudge_bot",
    "nudge_github",
    "nudge_irc",
];

/// Filter directives: a non-blank `RUST_LOG` replaces the per-crate
/// defaults entirely.
pub(crate) fn log_directives(level: LevelFilter, rust_log: Option<&str>) -> String {
    if let Some(directives) = rust_log.map(str::trim).filter(|value| !value.is_empty()) {
        return directives.to_string();
    }
    NUDGEBOT_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn init_tracing(level: LevelFilter) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(log_directives(level, rust_log.as_deref()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(level >= LevelFilter::DEBUG)
        .compact()
        .init();
}
