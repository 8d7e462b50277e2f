use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use linkgrab_core::core::events::{
    Delivery, NoHistory, NoHosting, RequesterId, StatusSink, StatusUpdate, TaskId,
};
use linkgrab_core::models::media::MediaKind;
use linkgrab_core::models::settings::Settings;
use linkgrab_lib::{Collaborators, Service};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Logs everything a chat front-end would otherwise render.
struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    async fn on_status(&self, update: StatusUpdate) {
        let text = update.text.replace('\n', " | ");
        if update.terminal {
            tracing::info!("[status] #{} -> {} (final): {}", update.task_id, update.requester, text);
        } else {
            tracing::debug!("[status] #{} -> {}: {}", update.task_id, update.requester, text);
        }
        if let Some(controls) = update.controls {
            tracing::debug!("[status] #{} controls: {:?}", update.task_id, controls);
        }
    }

    async fn on_complete(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let meta = tokio::fs::metadata(&delivery.file_path)
            .await
            .with_context(|| format!("delivered file missing: {}", delivery.file_path.display()))?;
        tracing::info!(
            "[deliver] #{} -> {}: {} ({} bytes, {}{})",
            delivery.task_id,
            delivery.requester,
            delivery.file_path.display(),
            meta.len(),
            delivery.kind,
            if delivery.from_cache { ", cached" } else { "" }
        );
        Ok(())
    }

    async fn on_oversize(&self, task_id: TaskId, requester: RequesterId, link: Option<String>) {
        match link {
            Some(link) => tracing::info!("[deliver] #{} -> {}: too large, hosted at {}", task_id, requester, link),
            None => tracing::warn!("[deliver] #{} -> {}: too large and no hosting available", task_id, requester),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Link {
        requester: RequesterId,
        kind: MediaKind,
        text: String,
    },
    Cancel {
        requester: RequesterId,
        task_id: TaskId,
    },
    Retry {
        requester: RequesterId,
        retry_id: String,
    },
}

fn parse_command(line: &str) -> anyhow::Result<Command> {
    let mut parts = line.trim().splitn(3, char::is_whitespace);
    let head = parts.next().unwrap_or("");
    match head {
        "cancel" => {
            let requester = parts.next().context("usage: cancel <requester> <task-id>")?;
            let task_id = parts.next().context("usage: cancel <requester> <task-id>")?;
            Ok(Command::Cancel {
                requester: requester.parse().context("requester must be a number")?,
                task_id: task_id.trim().parse().context("task id must be a number")?,
            })
        }
        "retry" => {
            let requester = parts.next().context("usage: retry <requester> <retry-id>")?;
            let retry_id = parts.next().context("usage: retry <requester> <retry-id>")?;
            Ok(Command::Retry {
                requester: requester.parse().context("requester must be a number")?,
                retry_id: retry_id.trim().to_string(),
            })
        }
        requester => {
            let usage = "usage: <requester> <video|audio> <text>";
            let requester = requester.parse().context(usage)?;
            let kind = parts.next().context(usage)?.parse()?;
            let text = parts.next().context(usage)?.trim().to_string();
            Ok(Command::Link {
                requester,
                kind,
                text,
            })
        }
    }
}

async fn handle(service: &Service, command: Command) {
    match command {
        Command::Link {
            requester,
            kind,
            text,
        } => match service.submit_link(requester, &text, kind).await {
            Ok(task_id) => tracing::info!("[input] queued #{} for {}", task_id, requester),
            Err(e) => tracing::warn!("[input] rejected for {}: {}", requester, e),
        },
        Command::Cancel { requester, task_id } => {
            let outcome = service.cancel(requester, task_id);
            tracing::info!("[input] cancel #{} by {}: {:?}", task_id, requester, outcome);
        }
        Command::Retry {
            requester,
            retry_id,
        } => match service.retry(requester, &retry_id) {
            Ok(task_id) => tracing::info!("[input] retry queued as #{} for {}", task_id, requester),
            Err(e) => tracing::warn!("[input] retry {} failed: {}", retry_id, e),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,linkgrab=debug,linkgrab_lib=debug")),
        )
        .init();

    let service = Service::start(
        &settings,
        Collaborators {
            sink: Arc::new(LogSink),
            hosting: Arc::new(NoHosting),
            history: Arc::new(NoHistory),
        },
    )
    .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match parse_command(&line) {
                    Ok(command) => handle(&service, command).await,
                    Err(e) => tracing::warn!("[input] {:#}", e),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("[input] interrupted");
                break;
            }
        }
    }

    service.shutdown().await;
    Ok(())
}
