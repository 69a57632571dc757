//! HTTP adapter for the daily chart endpoint.

mod identity;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, header};
use serde_json::Value;
use tracing::debug;

pub use identity::{DEFAULT_USER_AGENTS, FixedIdentity, IdentityStrategy, RandomUserAgent};

use crate::config::FetchConfig;
use crate::errors::{Result, TaskError};
use crate::pool::TaskResult;

pub const DEFAULT_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Query parameters for one daily-history request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartQuery {
    pub period1: i64,
    pub period2: i64,
    pub interval: &'static str,
    pub events: &'static str,
}

impl ChartQuery {
    /// Window covering `start` up to, but excluding, `end`.
    ///
    /// The API treats `period2` as inclusive, so one second is taken off the
    /// end boundary.
    pub fn for_window(start: NaiveDate, end: NaiveDate) -> Self {
        let midnight = |date: NaiveDate| date.and_time(NaiveTime::MIN).and_utc().timestamp();
        Self {
            period1: midnight(start),
            period2: midnight(end) - 1,
            interval: "1d",
            events: "history",
        }
    }

    pub fn as_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("period1", self.period1.to_string()),
            ("period2", self.period2.to_string()),
            ("interval", self.interval.to_string()),
            ("events", self.events.to_string()),
        ]
    }
}

/// Shared client used by every fetch task of a run.
pub struct ChartClient {
    client: Client,
    base_url: String,
    identity: Arc<dyn IdentityStrategy>,
    limiter: Option<DefaultDirectRateLimiter>,
}

impl ChartClient {
    pub fn new(config: &FetchConfig, identity: Arc<dyn IdentityStrategy>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let limiter = config
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            identity,
            limiter,
        })
    }

    /// Request URL for one ticker.
    pub fn ticker_url(&self, ticker: &str) -> String {
        format!("{}/{}", self.base_url, ticker)
    }

    /// Performs one GET and returns the decoded JSON body.
    ///
    /// Every failure is returned as a [`TaskError`] tagged with `url`.
    pub async fn fetch(&self, url: &str, query: &ChartQuery) -> TaskResult<Value> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let transport = |message: String| TaskError::Transport {
            target: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .query(&query.as_pairs())
            .header(header::USER_AGENT, self.identity.next_identity())
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown API error".to_string());
            return Err(transport(format!("HTTP {status}: {body}")));
        }

        let payload = response.json::<Value>().await.map_err(|e| TaskError::Decode {
            target: url.to_string(),
            message: e.to_string(),
        })?;
        debug!(url, "Fetched chart payload");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_excludes_the_end_day() {
        let query = ChartQuery::for_window(date(2022, 3, 1), date(2022, 3, 2));
        assert_eq!(query.period1, 1_646_092_800);
        assert_eq!(query.period2, 1_646_179_199);
        assert_eq!(query.interval, "1d");
        assert_eq!(query.events, "history");
    }

    #[test]
    fn query_pairs() {
        let query = ChartQuery::for_window(date(2022, 3, 1), date(2022, 3, 2));
        insta::assert_debug_snapshot!(query.as_pairs(), @r#"
        [
            (
                "period1",
                "1646092800",
            ),
            (
                "period2",
                "1646179199",
            ),
            (
                "interval",
                "1d",
            ),
            (
                "events",
                "history",
            ),
        ]
        "#);
    }

    #[test]
    fn ticker_urls_join_the_base() {
        let config = FetchConfig {
            base_url: "http://localhost:9/chart/".into(),
            ..FetchConfig::default()
        };
        let client = ChartClient::new(&config, Arc::new(FixedIdentity::new("test"))).unwrap();
        assert_eq!(client.ticker_url("AAPL"), "http://localhost:9/chart/AAPL");
    }

    #[tokio::test]
    async fn transport_failures_are_tagged_with_the_url() {
        let config = FetchConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout_secs: 1,
            requests_per_second: Some(10),
            ..FetchConfig::default()
        };
        let client = ChartClient::new(&config, Arc::new(FixedIdentity::new("test"))).unwrap();
        let url = client.ticker_url("AAPL");
        let query = ChartQuery::for_window(date(2022, 3, 1), date(2022, 3, 2));

        match client.fetch(&url, &query).await {
            Err(TaskError::Transport { target, .. }) => assert_eq!(target, url),
            other => panic!("expected a transport error, got {other:?}"),
        }
    }

    /// Answers a single request with `status` and `body`, returning the raw
    /// request head it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&head).into_owned()
        });
        (base, handle)
    }

    fn stub_client(base: &str) -> ChartClient {
        let config = FetchConfig {
            base_url: base.to_string(),
            timeout_secs: 5,
            ..FetchConfig::default()
        };
        ChartClient::new(&config, Arc::new(FixedIdentity::new("signals-test-agent"))).unwrap()
    }

    #[tokio::test]
    async fn json_body_is_returned_with_identity_and_window() {
        let (base, server) = serve_once("200 OK", r#"{"chart":{"result":[]}}"#).await;
        let client = stub_client(&base);
        let query = ChartQuery::for_window(date(2022, 3, 1), date(2022, 3, 2));

        let payload = client.fetch(&client.ticker_url("AAPL"), &query).await.unwrap();
        assert_eq!(payload["chart"]["result"], serde_json::json!([]));

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /aapl?period1=1646092800&period2=1646179199&interval=1d&events=history "));
        assert!(head.contains("user-agent: signals-test-agent"));
    }

    #[tokio::test]
    async fn error_status_keeps_the_body() {
        let (base, server) = serve_once("503 Service Unavailable", "try later").await;
        let client = stub_client(&base);
        let url = client.ticker_url("AAPL");
        let query = ChartQuery::for_window(date(2022, 3, 1), date(2022, 3, 2));

        match client.fetch(&url, &query).await {
            Err(TaskError::Transport { target, message }) => {
                assert_eq!(target, url);
                assert!(message.contains("503"), "{message}");
                assert!(message.contains("try later"), "{message}");
            }
            other => panic!("expected a transport error, got {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn non_json_body_is_a_decode_error() {
        let (base, server) = serve_once("200 OK", "<html>rate limited</html>").await;
        let client = stub_client(&base);
        let url = client.ticker_url("AAPL");
        let query = ChartQuery::for_window(date(2022, 3, 1), date(2022, 3, 2));

        assert!(matches!(
            client.fetch(&url, &query).await,
            Err(TaskError::Decode { ref target, .. }) if *target == url
        ));
        server.await.unwrap();
    }
}
