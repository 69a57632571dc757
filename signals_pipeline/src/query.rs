//! SQL query service boundary and the `--reload` step of `transform`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::credentials::Credentials;
use crate::errors::{Error, Result};
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(Error::Validation(format!("unknown query state {other:?}"))),
        }
    }
}

#[async_trait]
pub trait QueryService: Send + Sync {
    /// Submits `sql` and returns the execution id.
    async fn start_query(&self, sql: &str, database: &str, output_location: &str) -> Result<String>;

    async fn query_state(&self, execution_id: &str) -> Result<QueryState>;
}

/// Starts `sql` and polls until it reaches a terminal state.
pub async fn run_query(
    service: &dyn QueryService,
    sql: &str,
    database: &str,
    output_location: &str,
    poll_interval: Duration,
) -> Result<(String, QueryState)> {
    let execution_id = service.start_query(sql, database, output_location).await?;
    info!(execution_id, database, "Query started");

    loop {
        let state = service.query_state(&execution_id).await?;
        if state.is_terminal() {
            info!(execution_id, %state, "Query finished");
            return Ok((execution_id, state));
        }
        debug!(execution_id, %state, "Query in progress");
        tokio::time::sleep(poll_interval).await;
    }
}

/// Substitutes `{name}` placeholders from `vars`. `{{` and `}}` produce
/// literal braces.
pub fn render_sql_template(template: &str, vars: &HashMap<&str, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => {
                            return Err(Error::Config(format!("unterminated placeholder {{{name}")));
                        }
                    }
                }
                let value = vars
                    .get(name.trim())
                    .ok_or_else(|| Error::Config(format!("unknown SQL template placeholder {{{name}}}")))?;
                out.push_str(value);
            }
            '}' => return Err(Error::Config("unmatched '}' in SQL template".into())),
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Object written by the query service for one execution.
pub fn result_object_key(execution_id: &str) -> String {
    format!("{execution_id}.csv")
}

fn template_vars(config: &PipelineConfig) -> HashMap<&'static str, String> {
    HashMap::from([
        (
            "bucket_prefix",
            config.storage.data_bucket_path().display().to_string(),
        ),
        ("database", config.query.database.clone()),
        ("raw_prefix", config.ingest.raw_prefix.trim_matches('/').to_string()),
    ])
}

/// Runs the raw-table query and stores its result at `transform.raw_table`.
pub async fn reload_raw_table(
    config: &PipelineConfig,
    service: &dyn QueryService,
    query_store: &dyn ObjectStore,
) -> Result<PathBuf> {
    let template = tokio::fs::read_to_string(&config.query.template)
        .await
        .map_err(|e| {
            Error::Config(format!(
                "cannot read SQL template {}: {e}",
                config.query.template.display()
            ))
        })?;
    let sql = render_sql_template(&template, &template_vars(config))?;
    let output_location = config.storage.query_bucket_path().display().to_string();

    let (execution_id, state) = run_query(
        service,
        &sql,
        &config.query.database,
        &output_location,
        Duration::from_millis(config.query.poll_interval_ms),
    )
    .await?;
    if state != QueryState::Succeeded {
        return Err(Error::Query {
            execution_id,
            state: state.to_string(),
        });
    }

    let bytes = query_store.get(&result_object_key(&execution_id)).await?;
    let target = config.transform.raw_table.clone();
    write_file(&target, &bytes).await?;
    info!(execution_id, path = %target.display(), bytes = bytes.len(), "Raw table reloaded");
    Ok(target)
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

#[derive(Serialize)]
struct StartQueryRequest<'a> {
    query: &'a str,
    database: &'a str,
    output_location: &'a str,
}

#[derive(Deserialize)]
struct StartQueryResponse {
    execution_id: String,
}

#[derive(Deserialize)]
struct QueryStateResponse {
    state: String,
}

/// REST binding: `POST {endpoint}/queries` and `GET {endpoint}/queries/{id}`.
pub struct HttpQueryService {
    client: Client,
    endpoint: String,
    credentials: Arc<Credentials>,
}

impl HttpQueryService {
    pub fn new(endpoint: &str, credentials: Arc<Credentials>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }
}

async fn api_error(context: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown API error".to_string());
    Error::Validation(format!("{context} returned HTTP {status}: {body}"))
}

#[async_trait]
impl QueryService for HttpQueryService {
    async fn start_query(&self, sql: &str, database: &str, output_location: &str) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/queries", self.endpoint))
            .json(&StartQueryRequest {
                query: sql,
                database,
                output_location,
            });
        let response = self.credentials.apply(request).send().await?;
        if !response.status().is_success() {
            return Err(api_error("start query", response).await);
        }
        Ok(response.json::<StartQueryResponse>().await?.execution_id)
    }

    async fn query_state(&self, execution_id: &str) -> Result<QueryState> {
        let request = self
            .client
            .get(format!("{}/queries/{execution_id}", self.endpoint));
        let response = self.credentials.apply(request).send().await?;
        if !response.status().is_success() {
            return Err(api_error("query state", response).await);
        }
        response.json::<QueryStateResponse>().await?.state.parse()
    }
}
