//! Client identities presented to the price API.

use rand::Rng;

use crate::errors::{Error, Result};

/// Browser user agents rotated across requests.
pub const DEFAULT_USER_AGENTS: [&str; 2] = [
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_10_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/39.0.2171.95 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/42.0.2311.135 Safari/537.36 Edge/12.246",
];

/// Picks the identity (user agent) sent with the next request.
pub trait IdentityStrategy: Send + Sync {
    fn next_identity(&self) -> &str;
}

/// Uniform random choice over a fixed pool of user agents.
#[derive(Debug, Clone)]
pub struct RandomUserAgent {
    agents: Vec<String>,
}

impl RandomUserAgent {
    pub fn new(agents: Vec<String>) -> Result<Self> {
        if agents.iter().all(|agent| agent.trim().is_empty()) {
            return Err(Error::Config(
                "fetch.user_agents must contain at least one non-empty entry".into(),
            ));
        }
        Ok(Self {
            agents: agents
                .into_iter()
                .filter(|agent| !agent.trim().is_empty())
                .collect(),
        })
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }
}

impl Default for RandomUserAgent {
    fn default() -> Self {
        Self {
            agents: DEFAULT_USER_AGENTS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

impl IdentityStrategy for RandomUserAgent {
    fn next_identity(&self) -> &str {
        let index = rand::rng().random_range(0..self.agents.len());
        &self.agents[index]
    }
}

/// Always presents the same identity.
#[derive(Debug, Clone)]
pub struct FixedIdentity(String);

impl FixedIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }
}

impl IdentityStrategy for FixedIdentity {
    fn next_identity(&self) -> &str {
        &self.0
    }
}
