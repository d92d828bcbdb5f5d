//! Configuration loader
//!
//! The configuration file is accepted in either YAML or JSON syntax: the
//! content is tried as YAML first and as JSON second, independent of the
//! file extension.

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use std::path::Path;

/// Loader for the proxy configuration file
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file.
    ///
    /// An unreadable or empty file is an error; the caller decides whether
    /// that is fatal (startup) or keeps the previous snapshot (reload).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ProxyConfig> {
        let path = path.as_ref();
        let content = std::fs::read(path)
            .map_err(|e| Error::Config(format!("unable to load config file: {}", e)))?;

        if content.is_empty() {
            return Err(Error::Config(format!(
                "config file {} is empty",
                path.display()
            )));
        }

        Self::from_bytes(&content)
    }

    /// Parse configuration content, trying YAML first, then JSON.
    pub fn from_bytes(content: &[u8]) -> Result<ProxyConfig> {
        if let Ok(config) = serde_yaml::from_slice::<ProxyConfig>(content) {
            return Ok(config);
        }

        serde_json::from_slice::<ProxyConfig>(content)
            .map_err(|_| Error::Config("failed to read yaml & json from config file".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
domains:
  "host.example.com":
    slug: "app"
    force_ssl: true
    letsencrypt: true
generic: ".apps.example.com"
docker:
  hosts: { "10.0.0.1": "public1.example.com" }
  port: 2375
listenHTTP: ":80"
listenHTTPS: ":443"
"#;

    const JSON: &str = r#"{
  "domains": {
    "host.example.com": {"slug": "app", "force_ssl": true, "letsencrypt": true}
  },
  "generic": ".apps.example.com",
  "docker": {"hosts": {"10.0.0.1": "public1.example.com"}, "port": 2375},
  "listenHTTP": ":80",
  "listenHTTPS": ":443"
}"#;

    #[test]
    fn test_yaml_and_json_equivalent() {
        let from_yaml = ConfigLoader::from_bytes(YAML.as_bytes()).unwrap();
        let from_json = ConfigLoader::from_bytes(JSON.as_bytes()).unwrap();

        assert_eq!(from_yaml.generic, from_json.generic);
        assert_eq!(from_yaml.listen_http, from_json.listen_http);
        assert_eq!(from_yaml.docker.port, from_json.docker.port);
        assert_eq!(
            from_yaml.docker.hosts["10.0.0.1"],
            from_json.docker.hosts["10.0.0.1"]
        );

        let y = &from_yaml.domains["host.example.com"];
        let j = &from_json.domains["host.example.com"];
        assert_eq!(y.slug, j.slug);
        assert_eq!(y.force_ssl, j.force_ssl);
        assert_eq!(y.letsencrypt, j.letsencrypt);
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(ConfigLoader::from_bytes(b"{{{ not a config").is_err());
    }

    #[test]
    fn test_missing_file_rejected() {
        assert!(ConfigLoader::load("/nonexistent/dockgate-config.yml").is_err());
    }

    #[test]
    fn test_metrics_listen_default() {
        let config = ConfigLoader::from_bytes(JSON.as_bytes()).unwrap();
        assert_eq!(config.listen_metrics, "127.0.0.1:9000");
    }
}
