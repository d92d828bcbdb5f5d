//! Docker container discovery
//!
//! 📡 Periodically queries every configured Docker host and builds a
//! snapshot mapping slug → endpoint list. Containers advertise themselves
//! either through labels (preferred) or through environment variables; a
//! container carrying neither signal is ignored.
//!
//! Discovery is best-effort: a host that cannot be reached contributes
//! nothing to the snapshot and the next tick retries from scratch.

use bollard::container::ListContainersOptions;
use bollard::models::ContainerConfig;
use bollard::{Docker, API_DEFAULT_VERSION};
use dockgate_core::ProxyConfig;
use std::collections::HashMap;

/// Mapping of slug → ordered list of `host:port` endpoint strings.
///
/// Published atomically by the reload job; readers never observe a
/// partially-built pool.
pub type EndpointPool = HashMap<String, Vec<String>>;

/// Container label naming the logical service the container belongs to
const LABEL_SLUG: &str = "io.luzifer.dockerproxy.slug";
/// Container label naming the port the service listens on
const LABEL_PORT: &str = "io.luzifer.dockerproxy.port";

/// Environment fallback for [`LABEL_SLUG`]
const ENV_SLUG: &str = "ROUTER_SLUG";
/// Environment fallback for [`LABEL_PORT`]
const ENV_PORT: &str = "ROUTER_PORT";

/// Timeout in seconds for Docker API calls
const DOCKER_TIMEOUT_SECS: u64 = 120;

/// Query all configured Docker hosts and build a fresh endpoint pool.
///
/// Errors talking to any single host or container are swallowed here:
/// the affected host contributes no endpoints this tick, but the overall
/// snapshot is still produced.
pub async fn collect(config: &ProxyConfig) -> EndpointPool {
    let mut pool = EndpointPool::new();

    for (internal, public) in &config.docker.hosts {
        let endpoint = format!("tcp://{}:{}", internal, config.docker.port);

        let docker = match Docker::connect_with_http(&endpoint, DOCKER_TIMEOUT_SECS, API_DEFAULT_VERSION) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("could not connect to docker host {}: {}", endpoint, e);
                continue;
            }
        };

        let containers = match docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
        {
            Ok(containers) => containers,
            Err(e) => {
                tracing::warn!("could not list containers on {}: {}", endpoint, e);
                continue;
            }
        };

        for summary in containers {
            let Some(id) = summary.id else { continue };

            let inspected = match docker.inspect_container(&id, None).await {
                Ok(inspected) => inspected,
                Err(e) => {
                    tracing::debug!("could not inspect container {}: {}", id, e);
                    continue;
                }
            };

            let Some(container_config) = inspected.config else { continue };

            if let Some((slug, port)) = endpoint_signal(&container_config) {
                pool.entry(slug)
                    .or_default()
                    .push(format!("{}:{}", public, port));
            }
        }
    }

    tracing::debug!("discovery snapshot holds {} slug(s)", pool.len());
    pool
}

/// Extract the `(slug, port)` routing signal from a container.
///
/// Labels take precedence: when the slug label is present the port label is
/// used as-is and the environment is not consulted for that container.
fn endpoint_signal(config: &ContainerConfig) -> Option<(String, String)> {
    if let Some(labels) = &config.labels {
        if let Some(slug) = labels.get(LABEL_SLUG) {
            let port = labels.get(LABEL_PORT).cloned().unwrap_or_default();
            return Some((slug.clone(), port));
        }
    }

    let env = config.env.as_deref().unwrap_or_default();
    let mut slug = None;
    let mut port = None;
    for entry in env {
        match entry.split_once('=') {
            Some((ENV_SLUG, value)) => slug = Some(value.to_string()),
            Some((ENV_PORT, value)) => port = Some(value.to_string()),
            _ => {}
        }
    }

    slug.map(|slug| (slug, port.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_labels_take_precedence() {
        let config = ContainerConfig {
            labels: labels(&[(LABEL_SLUG, "web"), (LABEL_PORT, "8080")]),
            env: Some(vec![
                "ROUTER_SLUG=ignored".to_string(),
                "ROUTER_PORT=9999".to_string(),
            ]),
            ..Default::default()
        };

        assert_eq!(
            endpoint_signal(&config),
            Some(("web".to_string(), "8080".to_string()))
        );
    }

    #[test]
    fn test_slug_label_suppresses_env_fallback() {
        // Port label missing but slug label present: the env must not be
        // consulted for this container.
        let config = ContainerConfig {
            labels: labels(&[(LABEL_SLUG, "web")]),
            env: Some(vec!["ROUTER_PORT=9999".to_string()]),
            ..Default::default()
        };

        assert_eq!(
            endpoint_signal(&config),
            Some(("web".to_string(), String::new()))
        );
    }

    #[test]
    fn test_env_fallback() {
        let config = ContainerConfig {
            labels: labels(&[("com.example.unrelated", "x")]),
            env: Some(vec![
                "PATH=/usr/bin".to_string(),
                "ROUTER_SLUG=api".to_string(),
                "ROUTER_PORT=3000".to_string(),
            ]),
            ..Default::default()
        };

        assert_eq!(
            endpoint_signal(&config),
            Some(("api".to_string(), "3000".to_string()))
        );
    }

    #[test]
    fn test_unmarked_container_ignored() {
        let config = ContainerConfig {
            env: Some(vec!["PATH=/usr/bin".to_string()]),
            ..Default::default()
        };

        assert_eq!(endpoint_signal(&config), None);
    }
}
