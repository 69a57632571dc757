//! Catalog crawler boundary and the `crawl` command.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::credentials::Credentials;
use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerState {
    Ready,
    Running,
    Stopping,
}

impl fmt::Display for CrawlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
        })
    }
}

impl FromStr for CrawlerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "READY" => Ok(Self::Ready),
            "RUNNING" => Ok(Self::Running),
            "STOPPING" => Ok(Self::Stopping),
            other => Err(Error::Validation(format!("unknown crawler state {other:?}"))),
        }
    }
}

/// Summary of the most recent crawl.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LastCrawl {
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
}

impl fmt::Display for LastCrawl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;
        if let Some(message) = &self.error_message {
            write!(f, " ({message})")?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait CatalogCrawler: Send + Sync {
    async fn crawler_state(&self, name: &str) -> Result<CrawlerState>;

    async fn start_crawler(&self, name: &str) -> Result<()>;

    async fn last_crawl(&self, name: &str) -> Result<Option<LastCrawl>>;
}

/// Starts `name` when it is idle and waits for it to become ready again.
pub async fn run_crawler(
    crawler: &dyn CatalogCrawler,
    name: &str,
    poll_interval: Duration,
) -> Result<Option<LastCrawl>> {
    let state = crawler.crawler_state(name).await?;
    if state != CrawlerState::Ready {
        return Err(Error::Crawler {
            name: name.to_string(),
            message: format!("cannot start while {state}"),
        });
    }

    crawler.start_crawler(name).await?;
    info!(crawler = name, "Crawler started");

    loop {
        tokio::time::sleep(poll_interval).await;
        let state = crawler.crawler_state(name).await?;
        if state == CrawlerState::Ready {
            break;
        }
        info!(crawler = name, %state, "Crawler in progress");
    }

    let last = crawler.last_crawl(name).await?;
    match &last {
        Some(summary) => info!(crawler = name, result = %summary, "Crawler completed"),
        None => info!(crawler = name, "Crawler completed without a crawl summary"),
    }
    Ok(last)
}

#[derive(Deserialize)]
struct CrawlerResponse {
    state: String,
    #[serde(default)]
    last_crawl: Option<LastCrawl>,
}

/// REST binding: `GET {endpoint}/crawlers/{name}` and
/// `POST {endpoint}/crawlers/{name}/start`.
pub struct HttpCatalogCrawler {
    client: Client,
    endpoint: String,
    credentials: Arc<Credentials>,
}

impl HttpCatalogCrawler {
    pub fn new(endpoint: &str, credentials: Arc<Credentials>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn describe(&self, name: &str) -> Result<CrawlerResponse> {
        let request = self.client.get(format!("{}/crawlers/{name}", self.endpoint));
        let response = self.credentials.apply(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Crawler {
                name: name.to_string(),
                message: format!("describe returned HTTP {status}"),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CatalogCrawler for HttpCatalogCrawler {
    async fn crawler_state(&self, name: &str) -> Result<CrawlerState> {
        self.describe(name).await?.state.parse()
    }

    async fn start_crawler(&self, name: &str) -> Result<()> {
        let request = self
            .client
            .post(format!("{}/crawlers/{name}/start", self.endpoint));
        let response = self.credentials.apply(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            return Err(Error::Crawler {
                name: name.to_string(),
                message: format!("start returned HTTP {status}: {body}"),
            });
        }
        Ok(())
    }

    async fn last_crawl(&self, name: &str) -> Result<Option<LastCrawl>> {
        Ok(self.describe(name).await?.last_crawl)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct FakeCrawler {
        states: Mutex<Vec<CrawlerState>>,
        started: Mutex<bool>,
    }

    impl FakeCrawler {
        fn new(mut states: Vec<CrawlerState>) -> Self {
            states.reverse();
            Self {
                states: Mutex::new(states),
                started: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl CatalogCrawler for FakeCrawler {
        async fn crawler_state(&self, _: &str) -> Result<CrawlerState> {
            let mut states = self.states.lock().unwrap();
            Ok(if states.len() > 1 {
                states.pop().unwrap()
            } else {
                states[0]
            })
        }

        async fn start_crawler(&self, _: &str) -> Result<()> {
            *self.started.lock().unwrap() = true;
            Ok(())
        }

        async fn last_crawl(&self, _: &str) -> Result<Option<LastCrawl>> {
            Ok(Some(LastCrawl {
                status: "SUCCEEDED".into(),
                error_message: None,
                start_time: None,
            }))
        }
    }

    #[tokio::test]
    async fn busy_crawler_is_fatal() {
        let crawler = FakeCrawler::new(vec![CrawlerState::Running]);
        let err = run_crawler(&crawler, "signals-crawler", Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Crawler { .. }));
        assert!(!*crawler.started.lock().unwrap());
    }

    #[tokio::test]
    async fn waits_until_ready_again() {
        let crawler = FakeCrawler::new(vec![
            CrawlerState::Ready,
            CrawlerState::Running,
            CrawlerState::Stopping,
            CrawlerState::Ready,
        ]);
        let last = run_crawler(&crawler, "signals-crawler", Duration::from_millis(1))
            .await
            .unwrap();
        assert!(*crawler.started.lock().unwrap());
        assert_eq!(last.unwrap().to_string(), "SUCCEEDED");
        assert!(crawler.states.lock().unwrap().len() == 1);
    }

    #[test]
    fn parses_service_payload() {
        let payload: CrawlerResponse = serde_json::from_str(
            r#"{"state": "ready", "last_crawl": {"status": "FAILED", "error_message": "access denied"}}"#,
        )
        .unwrap();
        assert_eq!(payload.state.parse::<CrawlerState>().unwrap(), CrawlerState::Ready);
        assert_eq!(payload.last_crawl.unwrap().to_string(), "FAILED (access denied)");
    }
}
