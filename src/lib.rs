use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use linkgrab_core::core::events::{
    HistoryRecorder, HostingUploader, RequesterId, StatusSink, TaskId,
};
use linkgrab_core::models::media::MediaKind;
use linkgrab_core::models::settings::Settings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::cache::CacheStore;
use crate::core::http_client::HttpClients;
use crate::core::queue::{CancelOutcome, Scheduler, SchedulerConfig, SchedulerDeps, SubmitError};
use crate::core::registry::BackendRegistry;
use crate::core::resolver::{HttpPageFetcher, LinkResolver};
use crate::core::retry::RetryLinks;
use crate::core::url_parser::find_first_url;

pub mod core;
pub mod platforms;

const DRAIN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("no link found in the message")]
    NoLink,
    #[error("unsupported or unresolvable link: {0}")]
    Unsupported(String),
    #[error("retry link expired or already used")]
    RetryExpired,
    #[error("service is shutting down")]
    Closed,
}

impl From<SubmitError> for Rejection {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Closed => Rejection::Closed,
        }
    }
}

/// Messaging-side collaborators plugged into the service.
pub struct Collaborators {
    pub sink: Arc<dyn StatusSink>,
    pub hosting: Arc<dyn HostingUploader>,
    pub history: Arc<dyn HistoryRecorder>,
}

/// Entry point for inbound requests: resolves links, feeds the scheduler and
/// owns the background maintenance tasks.
pub struct Service {
    resolver: LinkResolver,
    scheduler: Scheduler,
    consumer: JoinHandle<()>,
    retry_links: RetryLinks,
    cache: Arc<CacheStore>,
    background: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Service {
    /// Wires the production stack: HTTP resolver, default backends, sqlite cache.
    pub async fn start(settings: &Settings, collaborators: Collaborators) -> anyhow::Result<Self> {
        let clients = HttpClients::new()?;
        let resolver = LinkResolver::new(Arc::new(HttpPageFetcher::new(clients.clone())));
        let registry = BackendRegistry::with_defaults(&clients);
        Self::assemble(settings, resolver, registry, clients.desktop, collaborators).await
    }

    pub async fn assemble(
        settings: &Settings,
        resolver: LinkResolver,
        registry: BackendRegistry,
        http: reqwest::Client,
        collaborators: Collaborators,
    ) -> anyhow::Result<Self> {
        settings.validate()?;
        tokio::fs::create_dir_all(&settings.work_dir)
            .await
            .with_context(|| format!("failed to create work dir {}", settings.work_dir.display()))?;

        let cache = Arc::new(
            CacheStore::open_with(&settings.cache)
                .await
                .context("failed to open cache store")?,
        );
        let retry_links = RetryLinks::new(settings.delivery.retry_link_ttl());
        let background = CancellationToken::new();

        let workers = vec![
            cache
                .clone()
                .spawn_reclaimer(settings.cache.cleanup_interval(), background.clone()),
            retry_links.spawn_sweeper(background.clone()),
        ];

        let deps = SchedulerDeps {
            cache: cache.clone(),
            registry: Arc::new(registry),
            sink: collaborators.sink,
            hosting: collaborators.hosting,
            history: collaborators.history,
            retry_links: retry_links.clone(),
            http,
        };
        let (scheduler, consumer) = Scheduler::start(SchedulerConfig::from_settings(settings), deps);

        tracing::info!(
            "[service] ready (cache {}, work dir {})",
            cache.dir().display(),
            settings.work_dir.display()
        );

        Ok(Self {
            resolver,
            scheduler,
            consumer,
            retry_links,
            cache,
            background,
            workers,
        })
    }

    /// Finds the first link in `text`, resolves it and queues the download.
    pub async fn submit_link(
        &self,
        requester: RequesterId,
        text: &str,
        kind: MediaKind,
    ) -> Result<TaskId, Rejection> {
        let raw = find_first_url(text).ok_or(Rejection::NoLink)?;
        let resolution = self.resolver.resolve(raw).await;
        let Some(canonical) = resolution.canonical else {
            tracing::info!("[service] rejected {} from requester {}", raw, requester);
            return Err(Rejection::Unsupported(raw.to_string()));
        };

        let task_id = self.scheduler.submit(requester, canonical, kind)?;
        Ok(task_id)
    }

    /// Resubmits the URL behind a retry control. Each id works once.
    pub fn retry(&self, requester: RequesterId, retry_id: &str) -> Result<TaskId, Rejection> {
        let link = self.retry_links.take(retry_id).ok_or(Rejection::RetryExpired)?;
        tracing::info!("[service] requester {} retrying {}", requester, link.url);
        Ok(self.scheduler.submit(requester, link.url, link.kind)?)
    }

    pub fn cancel(&self, requester: RequesterId, task_id: TaskId) -> CancelOutcome {
        self.scheduler.cancel(requester, task_id)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Stops accepting work, lets admitted tasks finish, then stops the
    /// maintenance tasks and closes the cache.
    pub async fn shutdown(self) {
        self.scheduler.shutdown();
        if let Err(e) = self.consumer.await {
            tracing::warn!("[service] scheduler consumer ended abnormally: {}", e);
        }
        while self.scheduler.running() > 0 {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        self.background.cancel();
        for worker in self.workers {
            let _ = worker.await;
        }
        self.cache.close().await;
        tracing::info!("[service] stopped");
    }
}
