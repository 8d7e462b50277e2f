use std::sync::Arc;

use async_trait::async_trait;
use linkgrab_core::platforms::Platform;

use crate::core::error::{FetchError, FetchResult};
use crate::core::extract;
use crate::core::http_client::{ClientProfile, HttpClients};
use crate::core::redirect::resolve_redirect;
use crate::core::url_parser::{
    classify_url, is_direct_file, is_generic_shortener, is_platform_shortener, matches_shape,
    strip_tracking,
};

/// A generic shortener may hand off to a platform link once; no further hops.
const MAX_PLATFORM_HOPS: usize = 2;

/// Network side of resolution, kept behind a trait so the resolution rules
/// can be exercised without HTTP.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    async fn follow_redirects(&self, url: &str) -> FetchResult<String>;
    async fn fetch_page(&self, url: &str, platform: Platform) -> FetchResult<String>;
}

pub struct HttpPageFetcher {
    clients: HttpClients,
}

impl HttpPageFetcher {
    pub fn new(clients: HttpClients) -> Self {
        Self { clients }
    }

    fn profile_for(platform: Platform) -> ClientProfile {
        match platform {
            Platform::TikTok | Platform::Instagram => ClientProfile::Mobile,
            _ => ClientProfile::Desktop,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn follow_redirects(&self, url: &str) -> FetchResult<String> {
        let platform = Platform::from_url(url).unwrap_or(Platform::DirectFile);
        resolve_redirect(self.clients.for_profile(Self::profile_for(platform)), url).await
    }

    async fn fetch_page(&self, url: &str, platform: Platform) -> FetchResult<String> {
        let client = self.clients.for_profile(Self::profile_for(platform));
        let resp = client
            .get(url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(FetchError::http_status(resp.status(), url));
        }
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    pub canonical: Option<String>,
    pub platform: Option<Platform>,
}

impl ResolutionResult {
    fn resolved(canonical: String, platform: Platform) -> Self {
        Self {
            canonical: Some(canonical),
            platform: Some(platform),
        }
    }

    fn unresolved(platform: Option<Platform>) -> Self {
        Self {
            canonical: None,
            platform,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.canonical.is_some()
    }
}

#[derive(Clone)]
pub struct LinkResolver {
    fetcher: Arc<dyn PageFetcher>,
}

impl LinkResolver {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Turns a shared link into a canonical, fetchable URL. Never fails: every
    /// network or parse problem degrades to an unresolved result.
    pub async fn resolve(&self, raw: &str) -> ResolutionResult {
        let url = raw.trim();
        if url::Url::parse(url).is_err() {
            return ResolutionResult::unresolved(None);
        }

        if is_direct_file(url) {
            return ResolutionResult::resolved(url.to_string(), Platform::DirectFile);
        }

        let result = self.resolve_hops(url.to_string()).await;
        match &result.canonical {
            Some(canonical) => tracing::info!("[resolve] {} -> {}", url, canonical),
            None => tracing::info!("[resolve] unresolved: {}", url),
        }
        result
    }

    async fn resolve_hops(&self, mut url: String) -> ResolutionResult {
        for hop in 0..MAX_PLATFORM_HOPS {
            let last_hop = hop + 1 == MAX_PLATFORM_HOPS;

            let Some(platform) = Platform::from_url(&url) else {
                if !last_hop && is_generic_shortener(&url) {
                    match self.fetcher.follow_redirects(&url).await {
                        Ok(target) if is_direct_file(&target) => {
                            return ResolutionResult::resolved(target, Platform::DirectFile);
                        }
                        Ok(target) if target != url => {
                            url = target;
                            continue;
                        }
                        Ok(_) => {}
                        Err(e) => tracing::debug!("[resolve] shortener {} failed: {}", url, e),
                    }
                }
                return ResolutionResult::unresolved(None);
            };

            let stripped = strip_tracking(&url);
            if matches_shape(platform, &stripped) {
                return ResolutionResult::resolved(stripped, platform);
            }

            let mut page_url = url.clone();
            if is_platform_shortener(platform, &url) || is_generic_shortener(&url) {
                let target = match self.fetcher.follow_redirects(&url).await {
                    Ok(target) => target,
                    Err(e) => {
                        tracing::debug!("[resolve] redirect for {} failed: {}", url, e);
                        return ResolutionResult::unresolved(Some(platform));
                    }
                };
                if is_direct_file(&target) {
                    return ResolutionResult::resolved(target, platform);
                }
                match Platform::from_url(&target) {
                    Some(landed) if landed != platform && !last_hop => {
                        url = target;
                        continue;
                    }
                    Some(landed) if landed != platform => {
                        return ResolutionResult::unresolved(Some(platform));
                    }
                    _ => {}
                }
                let stripped = strip_tracking(&target);
                if matches_shape(platform, &stripped) {
                    return ResolutionResult::resolved(stripped, platform);
                }
                page_url = target;
            }

            return self.scrape(&page_url, platform).await;
        }
        ResolutionResult::unresolved(None)
    }

    async fn scrape(&self, page_url: &str, platform: Platform) -> ResolutionResult {
        let strategies = extract::strategies_for(platform);
        if strategies.is_empty() {
            return ResolutionResult::unresolved(Some(platform));
        }

        let html = match self.fetcher.fetch_page(page_url, platform).await {
            Ok(html) => html,
            Err(e) => {
                tracing::debug!("[resolve] fetching {} failed: {}", page_url, e);
                return ResolutionResult::unresolved(Some(platform));
            }
        };

        for (i, strategy) in strategies.iter().enumerate() {
            let Some(candidate) = strategy(&html) else {
                continue;
            };
            match accept_candidate(page_url, &candidate, platform) {
                Some(canonical) => return ResolutionResult::resolved(canonical, platform),
                None => tracing::debug!(
                    "[resolve] strategy #{} for {} gave unusable candidate {}",
                    i,
                    platform.id(),
                    candidate
                ),
            }
        }

        ResolutionResult::unresolved(Some(platform))
    }
}

/// A scraped candidate is usable when it is a direct media file or has the
/// platform's own accepted shape once cleaned.
fn accept_candidate(page_url: &str, candidate: &str, platform: Platform) -> Option<String> {
    let absolute = url::Url::parse(page_url)
        .and_then(|base| base.join(candidate))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| candidate.to_string());

    if is_direct_file(&absolute) {
        return Some(absolute);
    }
    let stripped = strip_tracking(&absolute);
    (classify_url(&stripped) == Some(platform)).then_some(stripped)
}
