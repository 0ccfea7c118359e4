// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tether - streaming, tool-augmented conversation runner
//!
//! Entry point for the Tether CLI. Events go to stdout as JSON lines, logs
//! go to stderr.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;

use tether::chat::{ConversationSession, StreamRegistry, TurnEngine, TurnQuery};
use tether::cli::{ChatArgs, Cli, Commands};
use tether::config::Settings;
use tether::llm::message::{Message, SystemBlock};
use tether::llm::providers::HttpBackendFactory;
use tether::llm::{BackendPool, BackoffPolicy};
use tether::mcp::McpClient;
use tether::tools::{ToolDispatcher, ToolNameRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on engine diagnostics without knowing target names.
    // `RUST_LOG` still takes precedence.
    if cli.verbose > 0 {
        for directive in [
            "tether.chat.engine=debug",
            "tether.chat.stream=debug",
            "tether.llm.pool=debug",
            "tether.tools.dispatch=debug",
            "tether.mcp=debug",
        ] {
            if let Ok(parsed) = directive.parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("failed to load settings")?;

    match cli.command {
        Commands::Chat(args) => run_chat(args, settings).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

fn build_query(args: &ChatArgs, settings: &Settings) -> anyhow::Result<TurnQuery> {
    let mut query = TurnQuery::from_defaults(&settings.defaults, vec![Message::user(&args.prompt)]);
    if let Some(model) = &args.model {
        query.model_id = model.clone();
    }
    if let Some(max_turns) = args.max_turns {
        query.max_turns = max_turns;
    }
    if let Some(max_tokens) = args.max_tokens {
        query.max_tokens = max_tokens;
    }
    if let Some(temperature) = args.temperature {
        query.temperature = temperature;
    }
    if let Some(system) = &args.system {
        query.system = vec![SystemBlock::Text(system.clone())];
    }
    for (key, value) in &args.extra {
        query.extra.set(key, value)?;
    }
    query.server_ids = args.servers.clone();
    query.stream_id = Some(
        args.stream_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
    );
    Ok(query)
}

/// Start the requested tool servers.
///
/// Servers that are unknown or fail to start are left out; the engine then
/// reports them as listing failures and carries on with the rest.
async fn connect_tool_servers(server_ids: &[String], settings: &Settings) -> ToolDispatcher {
    let mut dispatcher = ToolDispatcher::new(Arc::new(ToolNameRegistry::new()));
    for server_id in server_ids {
        let Some(config) = settings.tool_servers.get(server_id) else {
            tracing::warn!(server_id = %server_id, "no tool server configured with this id");
            continue;
        };
        match McpClient::spawn(server_id.clone(), config).await {
            Ok(client) => dispatcher.add_server(server_id.clone(), Arc::new(client)),
            Err(error) => {
                tracing::warn!(
                    server_id = %server_id,
                    error = %error,
                    "failed to start tool server; continuing without it"
                );
            }
        }
    }
    dispatcher
}

async fn run_chat(args: ChatArgs, settings: Settings) -> anyhow::Result<()> {
    let query = build_query(&args, &settings)?;

    let dispatcher = connect_tool_servers(&args.servers, &settings).await;

    let factory = Arc::new(HttpBackendFactory::from_config(
        &settings.backend,
        settings.backend_api_key(),
    ));
    let pool = BackendPool::from_factory(
        factory,
        settings.backend.pool_size,
        BackoffPolicy::from(&settings.resilience),
    )?;

    let streams = Arc::new(StreamRegistry::new());
    let settings = Arc::new(settings);
    let engine = TurnEngine::new(Arc::new(pool), Arc::new(dispatcher), settings)
        .with_streams(Arc::clone(&streams));

    if let Some(stream_id) = query.stream_id.clone() {
        let streams = Arc::clone(&streams);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                streams.stop(&stream_id);
            }
        });
    }

    let mut session = ConversationSession::new();
    {
        let events = engine.process_query_stream(&mut session, query);
        futures::pin_mut!(events);

        let stdout = io::stdout();
        while let Some(event) = events.next().await {
            let line = serde_json::to_string(&event)?;
            let mut out = stdout.lock();
            writeln!(out, "{}", line)?;
            out.flush()?;
        }
    }

    tracing::info!(
        session_id = %session.id(),
        outcome = ?session.outcome(),
        "chat finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether::config::settings::ToolServerConfig;

    fn chat_args(cli: Cli) -> ChatArgs {
        match cli.command {
            Commands::Chat(args) => args,
            Commands::Config => panic!("expected chat"),
        }
    }

    #[test]
    fn test_build_query_uses_defaults() {
        let args = chat_args(Cli::parse_from(["tether", "chat", "-p", "hi"]));
        let settings = Settings::default();
        let query = build_query(&args, &settings).unwrap();
        assert_eq!(query.model_id, settings.defaults.model);
        assert_eq!(query.max_turns, 30);
        assert!(query.system.is_empty());
        assert!(query.stream_id.is_some());
    }

    #[test]
    fn test_build_query_overrides() {
        let args = chat_args(Cli::parse_from([
            "tether", "chat", "-p", "hi", "-m", "m2", "--max-turns", "2", "--system", "sys",
            "--stream-id", "abc", "-x", "only_n_most_recent_images=1",
        ]));
        let query = build_query(&args, &Settings::default()).unwrap();
        assert_eq!(query.model_id, "m2");
        assert_eq!(query.max_turns, 2);
        assert_eq!(query.system, vec![SystemBlock::Text("sys".to_string())]);
        assert_eq!(query.stream_id.as_deref(), Some("abc"));
        assert_eq!(query.extra.only_n_most_recent_images, Some(1));
    }

    #[tokio::test]
    async fn test_failed_tool_server_is_skipped() {
        let mut settings = Settings::default();
        settings.tool_servers.insert(
            "mail".to_string(),
            ToolServerConfig {
                command: "/nonexistent/tether-mail-server".to_string(),
                args: vec![],
                env: Default::default(),
            },
        );
        let servers = vec!["mail".to_string(), "unknown".to_string()];

        let dispatcher = connect_tool_servers(&servers, &settings).await;
        assert!(dispatcher.server_ids().is_empty());

        let (_, failures) = dispatcher.tool_config(&servers).await;
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn test_build_query_rejects_bad_extra() {
        let args = chat_args(Cli::parse_from(["tether", "chat", "-p", "hi", "-x", "budget_tokens=many"]));
        assert!(build_query(&args, &Settings::default()).is_err());
    }
}
