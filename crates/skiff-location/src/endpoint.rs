//! Web endpoints and the clusters published on them.

use std::path::Path;

use skiff_proto::{ClusterId, ClusterSpec, Command, ContainerId, PublishReply};
use tracing::info;

use crate::error::{LocationError, Result};
use crate::http::{poll_url, wait_http_200, HttpPoll};
use crate::location::Location;

/// Containers load-balanced behind one published fqdn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    uuid: Option<ClusterId>,
    containers: Vec<ContainerId>,
    rewrite: Option<String>,
}

impl Cluster {
    /// A cluster over `containers`, not yet published.
    #[must_use]
    pub fn new(containers: impl IntoIterator<Item = ContainerId>) -> Self {
        Self {
            uuid: None,
            containers: containers.into_iter().collect(),
            rewrite: None,
        }
    }

    /// Builder: rewrite the request path before proxying.
    #[must_use]
    pub fn with_rewrite(mut self, rewrite: impl Into<String>) -> Self {
        self.rewrite = Some(rewrite.into());
        self
    }

    /// Id assigned when published.
    #[must_use]
    pub const fn uuid(&self) -> Option<ClusterId> {
        self.uuid
    }

    /// Member containers.
    #[must_use]
    pub fn containers(&self) -> &[ContainerId] {
        &self.containers
    }

    /// Whether the cluster is published.
    #[must_use]
    pub const fn is_published(&self) -> bool {
        self.uuid.is_some()
    }

    fn spec(&self) -> ClusterSpec {
        ClusterSpec {
            containers: self.containers.clone(),
            rewrite: self.rewrite.clone(),
        }
    }
}

/// PEM material for serving a cluster over TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Certificate.
    pub cert: String,
    /// Private key.
    pub key: String,
    /// Intermediate chain.
    pub intermediates: Option<String>,
}

impl TlsMaterial {
    /// Read PEM files.
    pub fn from_files(cert: &Path, key: &Path, intermediates: Option<&Path>) -> Result<Self> {
        Ok(Self {
            cert: std::fs::read_to_string(cert)?,
            key: std::fs::read_to_string(key)?,
            intermediates: intermediates.map(std::fs::read_to_string).transpose()?,
        })
    }

    /// Certificate, key and intermediates concatenated into one blob.
    #[must_use]
    pub fn blob(&self) -> String {
        let mut blob = String::new();
        for part in [Some(&self.cert), Some(&self.key), self.intermediates.as_ref()]
            .into_iter()
            .flatten()
        {
            blob.push_str(part);
            if !part.ends_with('\n') {
                blob.push('\n');
            }
        }
        blob
    }
}

/// Subdomain of `fqdn` under `domain`, empty for the apex.
pub fn subdomain_of(fqdn: &str, domain: &str) -> Result<String> {
    let outside = || LocationError::OutsideDomain {
        fqdn: fqdn.to_string(),
        domain: domain.to_string(),
    };
    let rest = fqdn.strip_suffix(domain).ok_or_else(outside)?;
    if rest.is_empty() {
        return Ok(String::new());
    }
    rest.strip_suffix('.')
        .filter(|sub| !sub.is_empty())
        .map(String::from)
        .ok_or_else(outside)
}

/// One domain the location can serve.
#[derive(Debug, Clone)]
pub struct WebEndpoint {
    domain: String,
    location: Location,
}

impl WebEndpoint {
    pub(crate) const fn new(domain: String, location: Location) -> Self {
        Self { domain, location }
    }

    /// The domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Publish `cluster` at `fqdn`. Nothing is sent when `fqdn` is outside
    /// the domain. A cluster that was already published is moved.
    pub async fn publish(
        &self,
        cluster: &mut Cluster,
        fqdn: &str,
        tls: Option<&TlsMaterial>,
    ) -> Result<ClusterId> {
        let subdomain = subdomain_of(fqdn, &self.domain)?;
        if cluster.is_published() {
            self.unpublish(cluster)?;
        }

        let reply: PublishReply = self
            .location
            .conn()
            .send_blocking_cmd(
                Command::PublishWeb {
                    domain: self.domain.clone(),
                    subdomain,
                    cluster: cluster.spec(),
                    ssl: tls.map(TlsMaterial::blob),
                },
                self.location.config().rpc_timeout(),
            )
            .await?;

        cluster.uuid = Some(reply.cluster);
        self.location.record_cluster(&self.domain, cluster.clone());
        info!(domain = %self.domain, fqdn, cluster = %reply.cluster, "cluster published");
        Ok(reply.cluster)
    }

    /// Remove a published cluster.
    pub fn unpublish(&self, cluster: &mut Cluster) -> Result<()> {
        let uuid = cluster.uuid.take().ok_or(LocationError::NotPublished)?;
        self.location.forget_cluster(&self.domain, uuid);
        self.location
            .conn()
            .send_cmd(Command::UnpublishWeb { cluster: uuid })?;
        info!(domain = %self.domain, cluster = %uuid, "cluster unpublished");
        Ok(())
    }

    /// Clusters currently published on this endpoint.
    #[must_use]
    pub fn clusters(&self) -> Vec<Cluster> {
        self.location.clusters_of(&self.domain)
    }

    /// Poll the public fqdn until it answers 200.
    pub async fn wait_http_200(&self, fqdn: &str, tls: bool, path: Option<&str>) -> Result<()> {
        subdomain_of(fqdn, &self.domain)?;
        let scheme = if tls { "https" } else { "http" };
        wait_http_200(&poll_url(scheme, fqdn, None, path), &HttpPoll::default()).await
    }
}
