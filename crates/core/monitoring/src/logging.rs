//! A set of utilities to enable logging configuration using tracing_subscriber.

use std::{io::IsTerminal, sync::Once};

use tracing_subscriber::{self, EnvFilter, filter::LevelFilter};

static POOL_LOG_ENV_VAR: &str = "POOL_LOG";

/// Initializes a tracing subscriber for logging.
pub fn init() {
    // Since we also use this function to enable logging in tests, wrap it in `Once` to prevent
    // multiple initializations.
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (env_filter, pool_log_level) = env_filter_and_log_level();

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();

        tracing::info!("log level: {}", pool_log_level);
    });
}

/// Renders an error's source chain as a single string, for log fields.
///
/// The top-level error is excluded, callers log it separately under `error`.
pub fn error_source(err: &dyn std::error::Error) -> String {
    let mut out = String::new();
    let mut source = err.source();
    while let Some(err) = source {
        if !out.is_empty() {
            out.push_str(": ");
        }
        out.push_str(&err.to_string());
        source = err.source();
    }
    out
}

/// List of crates in the workspace.
const POOL_CRATES: &[&str] = &["monitoring", "pool_db", "pool_worker", "poold"];

fn env_filter_and_log_level() -> (EnvFilter, String) {
    // Parse directives from RUST_LOG
    let log_filter = EnvFilter::builder().with_default_directive(LevelFilter::ERROR.into());
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let mut env_filter = log_filter.parse_lossy(&directive_string);

    let log_level = std::env::var(POOL_LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());

    for crate_name in POOL_CRATES {
        // Add directives for each crate in POOL_CRATES, if not overriden by RUST_LOG
        if !directive_string.contains(&format!("{crate_name}=")) {
            if let Ok(directive) = format!("{crate_name}={log_level}").parse() {
                env_filter = env_filter.add_directive(directive);
            }
        }
    }

    (env_filter, log_level)
}

/// If this fails, just update the above `POOL_CRATES` to match reality.
#[test]
fn assert_pool_crates() {
    use cargo_metadata::MetadataCommand;

    let cmd = MetadataCommand::new().exec().unwrap();
    let mut names: Vec<String> = cmd
        .workspace_packages()
        .into_iter()
        .map(|pkg| pkg.name.replace("-", "_").clone())
        .collect();
    names.sort();
    assert_eq!(names, POOL_CRATES);
}
