use super::types::{DnsResolver, Upstream};
use anyhow::Result;
use hickory_resolver::proto::rr::{Record, RecordType};
use tracing::debug;

pub struct SingleResolver {
    pub(crate) upstream: Upstream,
}

#[async_trait::async_trait]
impl DnsResolver for SingleResolver {
    async fn resolve(&self, name: &str, query_type: RecordType) -> Result<Vec<Record>> {
        match self.upstream.resolver.lookup(name, query_type).await {
            Ok(lookup) => Ok(lookup.records().to_vec()),
            Err(e) => {
                debug!("Upstream {} failed for {}: {}", self.upstream.url, name, e);
                Err(anyhow::anyhow!("Lookup failed for {}: {}", name, e))
            }
        }
    }
}
