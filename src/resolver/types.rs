use anyhow::Result;
use hickory_resolver::proto::rr::{Record, RecordType};
use hickory_resolver::TokioResolver;

/// Abstract resolver so liveness checks can run against mocks.
///
/// `Ok` means the name resolved; every failure (NXDOMAIN, empty answer,
/// network error) is an `Err`.
#[async_trait::async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, name: &str, query_type: RecordType) -> Result<Vec<Record>>;
}

pub struct Upstream {
    pub url: String,
    pub resolver: TokioResolver,
}
