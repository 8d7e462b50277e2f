use std::time::Duration;

use anyhow::Context;

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProfile {
    Desktop,
    Mobile,
}

impl ClientProfile {
    pub fn user_agent(&self) -> &'static str {
        match self {
            ClientProfile::Desktop => DESKTOP_USER_AGENT,
            ClientProfile::Mobile => MOBILE_USER_AGENT,
        }
    }
}

pub fn build_client(profile: ClientProfile) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(profile.user_agent())
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .cookie_store(true)
        .build()
        .with_context(|| format!("failed to build {:?} HTTP client", profile))
}

/// Desktop and mobile clients, built once and cloned cheaply.
#[derive(Clone)]
pub struct HttpClients {
    pub desktop: reqwest::Client,
    pub mobile: reqwest::Client,
}

impl HttpClients {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            desktop: build_client(ClientProfile::Desktop)?,
            mobile: build_client(ClientProfile::Mobile)?,
        })
    }

    pub fn for_profile(&self, profile: ClientProfile) -> &reqwest::Client {
        match profile {
            ClientProfile::Desktop => &self.desktop,
            ClientProfile::Mobile => &self.mobile,
        }
    }
}
