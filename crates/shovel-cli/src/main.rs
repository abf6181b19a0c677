//! 🚀 shovel-cli: the front door.
//!
//! Loads config, sets up logging, wires Ctrl-C to cancellation, runs one pipeline, and
//! prints what happened. Everything interesting lives in the `shovel` library. 🦆
//!
//! Exit codes: 0 completed, 1 failed (or never started), 130 cancelled.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use comfy_table::{Cell, CellAlignment, Table, presets::UTF8_BORDERS_ONLY};
use shovel::{RunSummary, TerminalState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match shovel_it().await {
        Ok(summary) => {
            println!("{}", summary_table(&summary));
            ExitCode::from(exit_status(summary.terminal_state))
        }
        Err(err) => {
            report(&err);
            ExitCode::from(1)
        }
    }
}

async fn shovel_it() -> Result<RunSummary> {
    // 🎯 first arg is the config path; no arg means ./shovel.toml if it exists, env vars otherwise
    let path_arg = std::env::args().nth(1).unwrap_or_else(|| "shovel.toml".to_string());
    let config_file = Path::new(&path_arg);
    let config_file = match config_file.try_exists().context(format!(
        "💀 Couldn't even check whether '{}' exists. Permissions on a parent directory, maybe?",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => {
            warn!("📂 '{}' not found, going with SHOVEL_* env vars only", config_file.display());
            None
        }
    };

    let app_config = shovel::load_config(config_file)
        .context("💀 Couldn't load the config. Check the file for typos and missing sections.")?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C: finishing in-flight batches, then stopping");
            on_ctrl_c.cancel();
        }
    });

    let summary = shovel::run(app_config, cancel).await?;
    info!("🏁 run {}", summary.terminal_state);
    Ok(summary)
}

fn exit_status(state: TerminalState) -> u8 {
    match state {
        TerminalState::Completed => 0,
        TerminalState::Failed => 1,
        // -- 🛑 128 + SIGINT, what shells expect after a Ctrl-C
        TerminalState::Cancelled => 130,
    }
}

fn summary_table(summary: &RunSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["", "documents"]);
    let rows = [
        ("✅ succeeded", summary.succeeded),
        ("💀 failed", summary.failed),
        ("📭 never sent", summary.unsent),
        ("📊 attempted", summary.attempted),
        ("📦 batches", summary.batches),
        ("🔄 retries", summary.retries),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table.add_row(vec![Cell::new("🏁 outcome"), Cell::new(summary.terminal_state)]);
    if let Some(ref error) = summary.error {
        table.add_row(vec![Cell::new("⚠️ error"), Cell::new(error)]);
    }
    table
}

/// 🧅 Print the error chain, and a hint if it smells like nobody is listening on the other end.
fn report(err: &anyhow::Error) {
    error!("💀 error: {}", err);
    let mut looks_like_connection_trouble = false;
    for cause in err.chain().skip(1) {
        error!("⚠️  cause: {}", cause);
        let cause_str = cause.to_string();
        if cause_str.contains("error sending request")
            || cause_str.contains("connection refused")
            || cause_str.contains("Connection refused")
            || cause_str.contains("tcp connect error")
            || cause_str.contains("dns error")
        {
            looks_like_connection_trouble = true;
        }
    }

    if looks_like_connection_trouble {
        error!(
            "🔧 hint: the cluster doesn't seem reachable. Is Elasticsearch/OpenSearch running, \
            and is the url in [sink_config.Elasticsearch] right? With Docker, `docker ps` tells you \
            who's up and `docker compose up -d` wakes the rest."
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(terminal_state: TerminalState) -> RunSummary {
        RunSummary {
            attempted: 7,
            succeeded: 6,
            failed: 1,
            unsent: 0,
            batches: 3,
            retries: 1,
            terminal_state,
            error: None,
        }
    }

    #[test]
    fn the_one_where_each_ending_gets_its_own_exit_code() {
        assert_eq!(exit_status(TerminalState::Completed), 0);
        assert_eq!(exit_status(TerminalState::Failed), 1);
        assert_eq!(exit_status(TerminalState::Cancelled), 130);
    }

    #[test]
    fn the_one_where_the_summary_table_tells_the_whole_story() {
        let rendered = summary_table(&summary(TerminalState::Completed)).to_string();
        assert!(rendered.contains("succeeded"));
        assert!(rendered.contains("completed"));
        assert!(!rendered.contains("error"));

        let mut failed = summary(TerminalState::Failed);
        failed.error = Some(shovel::PipelineError::Source("disk on fire".into()));
        let rendered = summary_table(&failed).to_string();
        assert!(rendered.contains("disk on fire"));
    }
}
