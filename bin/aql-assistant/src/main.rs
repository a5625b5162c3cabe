// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use anyhow::{Context, Result};
use aql_engine::{
    format_validation_error, AskOptions, AssistantConfig, EngineError, EnvCredentialStore,
    ProviderPreference, QueryAssistant, Question, ValidationOutcome,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "aql-assistant", about = "Translate questions into validated AQL queries")]
struct Cli {
    /// TOML configuration file; environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Generate (and optionally run) a query for a natural-language question.
    Ask {
        question: String,

        #[arg(long, default_value = "auto")]
        provider: String,

        #[arg(long)]
        execute: bool,

        #[arg(long)]
        no_cache: bool,
    },
    /// Check a query against the service without running it.
    Validate { query: String },
    /// Show which language-model providers are reachable.
    Providers,
    TestConnection,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let config = AssistantConfig::load_with_env(cli.config.as_deref())
        .context("failed to load configuration")?;
    let assistant = QueryAssistant::from_config(config, Arc::new(EnvCredentialStore))
        .context("failed to initialise assistant")?;

    match cli.cmd {
        Command::Ask {
            question,
            provider,
            execute,
            no_cache,
        } => ask(&assistant, question, &provider, execute, !no_cache).await,
        Command::Validate { query } => validate(&assistant, &query).await,
        Command::Providers => providers(&assistant).await,
        Command::TestConnection => test_connection(&assistant).await,
    }
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn ask(
    assistant: &QueryAssistant,
    question: String,
    provider: &str,
    execute: bool,
    use_cache: bool,
) -> Result<()> {
    let preference: ProviderPreference = provider.parse()?;
    let options = AskOptions {
        preference: Some(preference),
        use_cache,
    };

    let progress = assistant.progress_reporter();
    let mut events = progress.channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            eprintln!("[{:>3}%] {}", event.percent, event.message);
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning request");
            interrupt.cancel();
        }
    });

    let result = assistant
        .ask(&Question::new(question), &options, &progress, &cancel)
        .await;
    drop(progress);
    let _ = printer.await;

    let generated = match result {
        Ok(generated) => generated,
        Err(EngineError::RetryExhausted { history, .. }) if !history.is_empty() => {
            for attempt in &history {
                eprintln!("attempt {}: {}", attempt.attempt_number, attempt.error);
            }
            let last = history.last().map(|a| a.error.clone()).unwrap_or_default();
            anyhow::bail!(
                "no valid query after {} attempts: {last}",
                history.len()
            );
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", generated.query);
    if !generated.explanation.is_empty() {
        eprintln!("\n{}", generated.explanation);
    }
    info!(
        attempts = generated.attempts,
        provider = %generated.provider,
        cached = generated.cached,
        "Query ready"
    );

    if execute {
        let rows = assistant.execute(&generated.query, use_cache).await?;
        println!("{}", serde_json::to_string_pretty(&rows.rows)?);
        eprintln!("{} rows in {} ms", rows.len(), rows.execution_time_ms);
    }
    Ok(())
}

async fn validate(assistant: &QueryAssistant, query: &str) -> Result<()> {
    match assistant.validate(query).await {
        ValidationOutcome::Valid => {
            println!("valid");
            Ok(())
        }
        ValidationOutcome::Invalid { message, details } => {
            anyhow::bail!("{}", format_validation_error(&message, &details, query))
        }
        ValidationOutcome::TransportFailure { reason } => {
            anyhow::bail!("could not reach the query service: {reason}")
        }
    }
}

async fn providers(assistant: &QueryAssistant) -> Result<()> {
    for (kind, available) in assistant.availability().await {
        let settings = assistant.config().provider_settings(kind);
        let status = if available { "available" } else { "unavailable" };
        println!("{:<8} {:<12} {}", kind.as_str(), status, settings.model);
    }
    Ok(())
}

async fn test_connection(assistant: &QueryAssistant) -> Result<()> {
    let status = assistant.test_connection().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.ok {
        anyhow::bail!("connection to {} failed", assistant.config().service.query_url());
    }
    Ok(())
}
