use crate::config::Config;
use crate::logger::{StatusEvent, StatusLogger};
use anyhow::{Context, Result};
use futures::{stream, StreamExt};
use reqwest::Client;
use rustc_hash::FxHashSet;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;
use tracing::{error, info, warn};

/// Where raw rule lines come from during a refresh.
#[async_trait::async_trait]
pub trait RuleSource: Send + Sync {
    /// Fetches every origin and returns the concatenated rule lines.
    /// Failing origins are reported and skipped.
    async fn fetch(&self, logger: &StatusLogger) -> Vec<String>;
}

pub fn parse_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
        return None;
    }
    Some(line)
}

/// De-duplicates and sorts the fetched lines into the merged rule list.
pub fn merge_rules(raw: impl IntoIterator<Item = String>) -> Vec<String> {
    let unique: FxHashSet<String> = raw.into_iter().collect();
    let mut merged: Vec<String> = unique.into_iter().collect();
    merged.sort_unstable();
    merged
}

pub struct HttpRuleSource {
    origins: Vec<(String, String)>,
    client: Client,
    concurrency: usize,
}

impl HttpRuleSource {
    pub fn new(
        origins: Vec<(String, String)>,
        timeout: Duration,
        concurrency: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent("ad-prune/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            origins,
            client,
            concurrency: concurrency.max(1),
        })
    }

    /// Origins from the `sources` table, sorted by name, followed by the
    /// URLs listed in `urls_file` if it exists.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut origins = config.get_sources_sorted();
        for url in read_url_list(Path::new(&config.urls_file)).await? {
            if !origins.iter().any(|(_, u)| *u == url) {
                origins.push((url.clone(), url));
            }
        }
        if origins.is_empty() {
            warn!("No rule sources configured");
        }
        Self::new(
            origins,
            Duration::from_secs(config.updates.fetch_timeout_secs),
            config.updates.concurrent_downloads,
        )
    }

    pub fn origins(&self) -> &[(String, String)] {
        &self.origins
    }

    async fn fetch_one(client: &Client, name: &str, url: &str) -> Result<Vec<String>> {
        info!("Fetching rule source '{}' from {}", name, url);
        let resp = client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("Request to {url} failed"))?;

        let stream = resp
            .bytes_stream()
            .map(|result| result.map_err(std::io::Error::other));
        let reader = StreamReader::new(stream);
        let mut lines = BufReader::new(reader).lines();
        let mut rules = Vec::new();

        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("Failed reading body of {url}"))?
        {
            if let Some(rule) = parse_line(&line) {
                rules.push(rule.to_string());
            }
        }
        info!("Parsed {} rules from '{}'", rules.len(), name);
        Ok(rules)
    }
}

#[async_trait::async_trait]
impl RuleSource for HttpRuleSource {
    async fn fetch(&self, logger: &StatusLogger) -> Vec<String> {
        let tasks: Vec<_> = self
            .origins
            .iter()
            .cloned()
            .map(|(name, url)| {
                let client = self.client.clone();
                async move {
                    let result = Self::fetch_one(&client, &name, &url).await;
                    (url, result)
                }
            })
            .collect();

        let results: Vec<_> = stream::iter(tasks)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut all = Vec::new();
        for (url, result) in results {
            match result {
                Ok(rules) => {
                    logger.emit(StatusEvent::SourceFetched {
                        url,
                        rules: rules.len(),
                    });
                    all.extend(rules);
                }
                Err(e) => {
                    error!("Failed to fetch {}: {:#}", url, e);
                    logger.emit(StatusEvent::SourceFailed {
                        url,
                        error: format!("{e:#}"),
                    });
                }
            }
        }
        all
    }
}

/// Fixed rule lines, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    rules: Vec<String>,
}

impl StaticRuleSource {
    pub fn new<I, S>(rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            rules: rules.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait::async_trait]
impl RuleSource for StaticRuleSource {
    async fn fetch(&self, _logger: &StatusLogger) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|line| parse_line(line))
            .map(str::to_string)
            .collect()
    }
}

async fn read_url_list(path: &Path) -> Result<Vec<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text
            .lines()
            .filter_map(parse_line)
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}
