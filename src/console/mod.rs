//! Line-oriented stand-in for a chat transport: stdin in, stdout out.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::flow::{Interaction, Reply, ReplyKind, SellFlow};

/// What one typed line turned into.
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleInput {
    Interaction(Interaction),
    Help,
    Quit,
    Empty,
    /// `#N` with no such option on screen.
    UnknownOption(usize),
}

/// `/cmd args` → command, `#N` → option N of the last reply, `@key` → raw key,
/// anything else → free text.
pub fn parse_line(line: &str, option_keys: &[String]) -> ConsoleInput {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ConsoleInput::Empty;
    }
    if let Some(rest) = trimmed.strip_prefix('/') {
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();
        let args: Vec<String> = parts.map(str::to_string).collect();
        return match name.as_str() {
            "quit" | "exit" | "q" => ConsoleInput::Quit,
            "help" | "?" => ConsoleInput::Help,
            _ => ConsoleInput::Interaction(Interaction::Command { name, args }),
        };
    }
    if let Some(index) = trimmed.strip_prefix('#').and_then(|n| n.parse::<usize>().ok()) {
        return match index.checked_sub(1).and_then(|i| option_keys.get(i)) {
            Some(key) => ConsoleInput::Interaction(Interaction::Selection(key.clone())),
            None => ConsoleInput::UnknownOption(index),
        };
    }
    if let Some(key) = trimmed.strip_prefix('@') {
        return ConsoleInput::Interaction(Interaction::Selection(key.trim().to_string()));
    }
    ConsoleInput::Interaction(Interaction::Text(trimmed.to_string()))
}

pub fn render(reply: &Reply) -> String {
    let mut out = String::new();
    match reply.kind {
        ReplyKind::Message => {}
        ReplyKind::Update => out.push_str("(updated)\n"),
        ReplyKind::Notice => out.push_str("(notice) "),
    }
    out.push_str(&reply.text);
    out.push('\n');
    let mut index = 0;
    for row in &reply.options {
        let labels: Vec<String> = row
            .iter()
            .map(|option| {
                index += 1;
                format!("[#{index}] {}", option.label)
            })
            .collect();
        out.push_str("  ");
        out.push_str(&labels.join("   "));
        out.push('\n');
    }
    out
}

fn help_lines() -> Vec<&'static str> {
    vec![
        "Commands:",
        "  /sell                                   list tokens to sell",
        "  /selllegacy <mint> <amount> [slip%]     sell an exact amount",
        "  /buy <mint> <sol_amount> [slip%]        spend SOL on a token",
        "  /cancel                                 drop a pending custom amount",
        "  #N                                      pick option N of the last reply",
        "  @<key>                                  send a raw option key",
        "  /quit",
    ]
}

/// Reads stdin until EOF or `/quit`, acting as `user_id`.
pub async fn run(flow: Arc<SellFlow>, user_id: &str) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut option_keys: Vec<String> = Vec::new();

    stdout
        .write_all(format!("Acting as user {user_id}. /help for commands.\n> ").as_bytes())
        .await
        .context("write stdout")?;
    stdout.flush().await.context("flush stdout")?;

    while let Some(line) = lines.next_line().await.context("read stdin")? {
        let output = match parse_line(&line, &option_keys) {
            ConsoleInput::Quit => break,
            ConsoleInput::Empty => String::new(),
            ConsoleInput::Help => format!("{}\n", help_lines().join("\n")),
            ConsoleInput::UnknownOption(index) => format!("No option #{index}.\n"),
            ConsoleInput::Interaction(interaction) => {
                match flow.handle(user_id, interaction).await {
                    Some(reply) => {
                        if !reply.options.is_empty() || reply.step.is_terminal() {
                            option_keys =
                                reply.option_keys().into_iter().map(String::from).collect();
                        }
                        render(&reply)
                    }
                    None => "(not handled by the sell flow)\n".to_string(),
                }
            }
        };
        stdout
            .write_all(format!("{output}> ").as_bytes())
            .await
            .context("write stdout")?;
        stdout.flush().await.context("flush stdout")?;
    }
    Ok(())
}
