// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! Defines all command-line arguments and subcommands for Tether.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tether - streaming, tool-augmented conversation runner
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about = "Streaming, tool-augmented conversation runner")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to $TETHER_HOME/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one query and print its events as JSON lines
    Chat(ChatArgs),

    /// Print the effective settings
    Config,
}

/// Arguments for the chat subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Prompt to send
    #[arg(short, long)]
    pub prompt: String,

    /// Model to use
    #[arg(short, long)]
    pub model: Option<String>,

    /// Tool server ids to offer to the model (repeatable)
    #[arg(short, long = "server")]
    pub servers: Vec<String>,

    /// Maximum number of turns
    #[arg(long)]
    pub max_turns: Option<u32>,

    /// Maximum output tokens per turn
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// System prompt
    #[arg(long)]
    pub system: Option<String>,

    /// Stream id used for cooperative stop (generated when omitted)
    #[arg(long)]
    pub stream_id: Option<String>,

    /// Extra parameters as key=value (repeatable)
    #[arg(short = 'x', long = "extra", value_parser = parse_key_value)]
    pub extra: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{}'", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_minimal() {
        let cli = Cli::parse_from(["tether", "chat", "--prompt", "hello"]);
        let Commands::Chat(args) = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(args.prompt, "hello");
        assert!(args.servers.is_empty());
        assert!(args.model.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_chat_full() {
        let cli = Cli::parse_from([
            "tether",
            "-vv",
            "chat",
            "-p",
            "price of 08-50-0113?",
            "--model",
            "m1",
            "--server",
            "catalog",
            "--server",
            "mail",
            "--max-turns",
            "4",
            "--max-tokens",
            "2048",
            "-t",
            "0.5",
            "--system",
            "be brief",
            "--stream-id",
            "s-1",
            "-x",
            "enable_thinking=true",
            "--extra",
            "budget_tokens = 2000",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Chat(args) = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(args.servers, vec!["catalog", "mail"]);
        assert_eq!(args.max_turns, Some(4));
        assert_eq!(args.max_tokens, Some(2048));
        assert_eq!(args.temperature, Some(0.5));
        assert_eq!(args.system.as_deref(), Some("be brief"));
        assert_eq!(args.stream_id.as_deref(), Some("s-1"));
        assert_eq!(
            args.extra,
            vec![
                ("enable_thinking".to_string(), "true".to_string()),
                ("budget_tokens".to_string(), "2000".to_string()),
            ]
        );
    }

    #[test]
    fn test_chat_requires_prompt() {
        assert!(Cli::try_parse_from(["tether", "chat"]).is_err());
    }

    #[test]
    fn test_extra_requires_equals() {
        assert!(Cli::try_parse_from(["tether", "chat", "-p", "x", "-x", "novalue"]).is_err());
        assert!(parse_key_value("=v").is_err());
    }

    #[test]
    fn test_config_command() {
        let cli = Cli::parse_from(["tether", "--config", "/tmp/s.json", "config"]);
        assert!(matches!(cli.command, Commands::Config));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json")));
    }
}
