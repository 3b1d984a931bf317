pub mod round_robin;
pub mod sequential;
pub mod single;
pub mod types;

use crate::config::DnsConfig;
use anyhow::{Context, Result};
use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::lookup_ip::LookupIp;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use self::round_robin::RoundRobinResolver;
use self::sequential::SequentialResolver;
use self::single::SingleResolver;
pub use self::types::{DnsResolver, Upstream};

/// Builds the resolver used for liveness checks.
///
/// With no upstreams configured the system resolver configuration is used.
pub async fn create_resolver(config: &DnsConfig) -> Result<Arc<dyn DnsResolver>> {
    if config.upstream_servers.is_empty() {
        let upstream = create_system_upstream(config)?;
        return Ok(Arc::new(SingleResolver { upstream }) as Arc<dyn DnsResolver>);
    }

    let mut upstreams = Vec::new();
    for (idx, upstream_url) in config.upstream_servers.iter().enumerate() {
        match create_single_upstream(config, upstream_url, idx).await {
            Ok(Some(upstream)) => upstreams.push(upstream),
            Ok(None) => {
                // Warning already logged in create_single_upstream
            }
            Err(e) => {
                error!("Critical error creating upstream {}: {}", upstream_url, e);
            }
        }
    }

    if upstreams.is_empty() {
        return Err(anyhow::anyhow!("No valid upstreams available"));
    }

    if upstreams.len() == 1 {
        let upstream = upstreams.remove(0);
        return Ok(Arc::new(SingleResolver { upstream }) as Arc<dyn DnsResolver>);
    }

    match config.resolution_policy.as_str() {
        "sequential" => Ok(Arc::new(SequentialResolver { upstreams }) as Arc<dyn DnsResolver>),
        "round-robin" => Ok(Arc::new(RoundRobinResolver::new(upstreams)) as Arc<dyn DnsResolver>),
        other => {
            info!(
                "Unknown resolution policy '{}', defaulting to round-robin",
                other
            );
            Ok(Arc::new(RoundRobinResolver::new(upstreams)) as Arc<dyn DnsResolver>)
        }
    }
}

fn lookup_options(config: &DnsConfig) -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    // Every rule is looked up once per run; caching only holds memory.
    opts.cache_size = 0;
    opts.timeout = config.timeout();
    opts.attempts = 1;
    opts
}

fn create_system_upstream(config: &DnsConfig) -> Result<Upstream> {
    let mut builder =
        TokioResolver::builder_tokio().context("Failed to read system resolver configuration")?;
    *builder.options_mut() = lookup_options(config);
    info!("No upstream servers configured, using the system resolver.");
    Ok(Upstream {
        url: "system".to_string(),
        resolver: builder.build(),
    })
}

fn parse_protocol(scheme: &str) -> Protocol {
    match scheme {
        "udp" => Protocol::Udp,
        "tcp" => Protocol::Tcp,
        "tls" => Protocol::Tls,
        "https" => Protocol::Https,
        _ => Protocol::Udp,
    }
}

fn default_port(protocol: Protocol) -> u16 {
    match protocol {
        Protocol::Tls => 853,
        Protocol::Https => 443,
        _ => 53,
    }
}

async fn create_single_upstream(
    config: &DnsConfig,
    upstream_url: &str,
    idx: usize,
) -> Result<Option<Upstream>> {
    let url = Url::parse(upstream_url).context("Failed to parse upstream URL")?;
    let protocol = parse_protocol(url.scheme());
    let port = url.port().unwrap_or(default_port(protocol));
    let host_str = url.host_str().unwrap_or("0.0.0.0");

    let socket_addr = match bootstrap_host(config, host_str, port).await {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to bootstrap {}: {}", host_str, e);
            return Ok(None);
        }
    };

    let mut ns_cfg = NameServerConfig::new(socket_addr, protocol);
    if matches!(protocol, Protocol::Tls | Protocol::Https) {
        ns_cfg.tls_dns_name = Some(host_str.to_string());
    }

    let mut resolver_config = ResolverConfig::new();
    resolver_config.add_name_server(ns_cfg);

    let resolver =
        Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
            .with_options(lookup_options(config))
            .build();

    info!(
        "Added upstream: [{}] {} ({})",
        idx, upstream_url, socket_addr
    );

    Ok(Some(Upstream {
        url: upstream_url.to_string(),
        resolver,
    }))
}

async fn bootstrap_host(config: &DnsConfig, host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = host.parse() {
        return Ok(SocketAddr::new(addr, port));
    }

    let bootstrap_config = if config.bootstrap_dns.is_empty() {
        ResolverConfig::google()
    } else {
        let mut cfg = ResolverConfig::new();
        for ip in &config.bootstrap_dns {
            if let Ok(sa) = ip.parse::<SocketAddr>() {
                cfg.add_name_server(NameServerConfig::new(sa, Protocol::Udp));
            }
        }
        cfg
    };

    let mut builder =
        Resolver::builder_with_config(bootstrap_config, TokioConnectionProvider::default());
    *builder.options_mut() = ResolverOpts::default();
    let bootstrap = builder.build();

    info!("Bootstrapping upstream host: {}", host);
    let lookup: LookupIp = bootstrap.lookup_ip(host).await?;
    let ip = lookup
        .into_iter()
        .next()
        .context("No IP found for bootstrap host")?;

    Ok(SocketAddr::new(ip, port))
}
