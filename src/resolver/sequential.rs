use super::types::{DnsResolver, Upstream};
use anyhow::Result;
use hickory_resolver::proto::rr::{Record, RecordType};
use tracing::debug;

/// Asks each upstream in order until one answers.
pub struct SequentialResolver {
    pub(crate) upstreams: Vec<Upstream>,
}

#[async_trait::async_trait]
impl DnsResolver for SequentialResolver {
    async fn resolve(&self, name: &str, query_type: RecordType) -> Result<Vec<Record>> {
        for upstream in &self.upstreams {
            match upstream.resolver.lookup(name, query_type).await {
                Ok(lookup) => return Ok(lookup.records().to_vec()),
                Err(e) => {
                    debug!("Upstream {} failed for {}: {}", upstream.url, name, e);
                    continue;
                }
            }
        }
        Err(anyhow::anyhow!("All upstreams failed for {}", name))
    }
}
