//! Gateway configuration
//!
//! The configuration is read from a YAML file at startup and can be replaced
//! as a whole at runtime through a partial JSON patch. Both paths go through
//! [`GatewayConfig::normalized`], which canonicalizes the engine addresses and
//! rejects a shadow cluster that points back at production.

use crate::error::{Result, TandemError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Port used when the configured one is missing or outside 1..=65535
pub const DEFAULT_PROXY_PORT: u16 = 8080;

/// Config file looked up when no path is given
pub const DEFAULT_CONFIG_PATH: &str = "shadow-proxy.yaml";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Key spellings accepted by earlier releases of the config API
const LEGACY_KEYS: &[(&str, &str)] = &[
    ("ProdAddress", "prod-address"),
    ("ShadowAddress", "shadow-address"),
    ("ProxyPort", "proxy-port"),
];

/// Published gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GatewayConfig {
    /// Production engine address (scheme optional, defaults to http)
    #[serde(default, alias = "ProdAddress")]
    pub prod_address: String,

    /// Shadow engine address; empty disables shadowing
    #[serde(default, alias = "ShadowAddress")]
    pub shadow_address: String,

    /// Listen port for the gateway; out-of-range values fall back to the default
    #[serde(default, alias = "ProxyPort")]
    pub proxy_port: i64,

    /// Accept invalid TLS certificates from both engines
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    /// Prepended to the production query id to form the shadow query id
    #[serde(default)]
    pub shadow_query_id_prefix: String,

    /// TCP connect timeout toward the engines
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            prod_address: String::new(),
            shadow_address: String::new(),
            proxy_port: i64::from(DEFAULT_PROXY_PORT),
            insecure_skip_tls_verify: false,
            shadow_query_id_prefix: String::new(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(TandemError::ConfigError("file path is empty".into()));
        }
        debug!(path = %path.display(), "loading configuration");

        let config = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml).required(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Whether a shadow engine is configured
    pub fn shadow_enabled(&self) -> bool {
        !self.shadow_address.is_empty()
    }

    /// Port to bind; only meaningful on a normalized configuration
    pub fn listen_port(&self) -> u16 {
        u16::try_from(self.proxy_port)
            .ok()
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_PROXY_PORT)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Return a normalized copy, or the reason this configuration is unusable.
    ///
    /// Addresses are trimmed, given an `http://` scheme when they have none,
    /// and stripped of trailing slashes. Production and shadow must not share
    /// scheme and authority (host compared case-insensitively).
    pub fn normalized(&self) -> Result<Self> {
        let mut out = self.clone();

        let (prod, prod_url) = normalize_address("prod-address", &self.prod_address)?;
        out.prod_address = prod;

        if self.shadow_address.trim().is_empty() {
            out.shadow_address = String::new();
        } else {
            let (shadow, shadow_url) = normalize_address("shadow-address", &self.shadow_address)?;
            if same_authority(&prod_url, &shadow_url) {
                return Err(TandemError::InvalidConfig(format!(
                    "prod-address and shadow-address must not be the same ({})",
                    out.prod_address
                )));
            }
            out.shadow_address = shadow;
        }

        if !(1..=i64::from(u16::MAX)).contains(&out.proxy_port) {
            if out.proxy_port != 0 {
                warn!(
                    port = out.proxy_port,
                    default = DEFAULT_PROXY_PORT,
                    "proxy-port out of range, using default"
                );
            }
            out.proxy_port = i64::from(DEFAULT_PROXY_PORT);
        }
        if out.connect_timeout_secs == 0 {
            out.connect_timeout_secs = DEFAULT_CONNECT_TIMEOUT_SECS;
        }
        Ok(out)
    }

    /// Merge a partial JSON document onto this configuration.
    ///
    /// Only the keys present in `patch` change. Legacy key spellings
    /// (`ProdAddress`, ...) are accepted alongside the kebab-case ones. The
    /// result is not validated; call [`GatewayConfig::normalized`] before
    /// publishing it.
    pub fn merge_patch(&self, patch: serde_json::Value) -> Result<Self> {
        let serde_json::Value::Object(fields) = patch else {
            return Err(TandemError::SerializationError(
                "config patch must be a JSON object".into(),
            ));
        };

        let mut current = serde_json::to_value(self)?;
        if let serde_json::Value::Object(map) = &mut current {
            for (key, value) in fields {
                map.insert(canonical_key(key), value);
            }
        }
        Ok(serde_json::from_value(current)?)
    }
}

fn canonical_key(key: String) -> String {
    LEGACY_KEYS
        .iter()
        .find(|(legacy, _)| legacy.eq_ignore_ascii_case(&key))
        .map_or(key, |(_, canonical)| (*canonical).to_string())
}

/// Canonicalize one engine address.
///
/// Returns the normalized string form alongside the parsed URL.
pub fn normalize_address(name: &str, addr: &str) -> Result<(String, Url)> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(TandemError::InvalidConfig(format!("{} is required", name)));
    }

    let lowered = addr.to_ascii_lowercase();
    let with_scheme = if lowered.starts_with("http://") || lowered.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };
    let normalized = with_scheme.trim_end_matches('/').to_string();

    match Url::parse(&normalized) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => Ok((normalized, url)),
        _ => Err(TandemError::InvalidConfig(format!("invalid {}: {}", name, normalized))),
    }
}

fn same_authority(a: &Url, b: &Url) -> bool {
    let host_eq = match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    };
    host_eq && a.scheme() == b.scheme() && a.port_or_known_default() == b.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(prod: &str, shadow: &str) -> GatewayConfig {
        GatewayConfig {
            prod_address: prod.into(),
            shadow_address: shadow.into(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_normalize_address_defaults_scheme_and_strips_slashes() {
        let (addr, url) = normalize_address("prod-address", "  presto.internal:8080// ").unwrap();
        assert_eq!(addr, "http://presto.internal:8080");
        assert_eq!(url.host_str(), Some("presto.internal"));
        assert_eq!(url.port(), Some(8080));

        let (addr, _) = normalize_address("prod-address", "https://presto.internal/").unwrap();
        assert_eq!(addr, "https://presto.internal");
    }

    #[test]
    fn test_normalize_address_rejects_empty_and_hostless() {
        let err = normalize_address("prod-address", "   ").unwrap_err();
        assert_eq!(err.to_string(), "prod-address is required");

        let err = normalize_address("shadow-address", "http://").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().starts_with("invalid shadow-address"));
    }

    #[test]
    fn test_same_host_is_rejected_case_insensitively() {
        let err = config("http://Presto.Example.com", "presto.example.COM/")
            .normalized()
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("must not be the same"));
    }

    #[test]
    fn test_same_host_different_scheme_is_allowed() {
        let cfg = config("http://presto.example.com", "https://presto.example.com")
            .normalized()
            .unwrap();
        assert_eq!(cfg.shadow_address, "https://presto.example.com");
    }

    #[test]
    fn test_same_host_different_port_is_allowed() {
        let cfg = config("presto:8080", "presto:8081").normalized().unwrap();
        assert_eq!(cfg.prod_address, "http://presto:8080");
        assert_eq!(cfg.shadow_address, "http://presto:8081");
    }

    #[test]
    fn test_empty_shadow_disables_shadowing() {
        let cfg = config("prod", "  ").normalized().unwrap();
        assert!(!cfg.shadow_enabled());
        assert_eq!(cfg.shadow_address, "");
    }

    #[test]
    fn test_zero_port_defaults() {
        let mut cfg = config("prod", "");
        cfg.proxy_port = 0;
        assert_eq!(cfg.normalized().unwrap().listen_port(), DEFAULT_PROXY_PORT);
    }

    #[test]
    fn test_out_of_range_port_falls_back_to_default() {
        let base = config("prod", "");
        for port in [70000, -1, 65536] {
            let merged = base.merge_patch(serde_json::json!({ "proxy-port": port })).unwrap();
            let cfg = merged.normalized().unwrap();
            assert_eq!(cfg.proxy_port, 8080);
            assert_eq!(cfg.listen_port(), 8080);
        }

        let cfg = config("prod", "").merge_patch(serde_json::json!({ "proxy-port": 65535 })).unwrap();
        assert_eq!(cfg.normalized().unwrap().listen_port(), 65535);
    }

    #[test]
    fn test_merge_patch_accepts_legacy_keys() {
        let base = config("http://prod", "");
        let merged = base
            .merge_patch(serde_json::json!({
                "ShadowAddress": "http://shadow",
                "ProxyPort": 9090,
            }))
            .unwrap();
        assert_eq!(merged.prod_address, "http://prod");
        assert_eq!(merged.shadow_address, "http://shadow");
        assert_eq!(merged.proxy_port, 9090);

        let cleared = base.merge_patch(serde_json::json!({ "ProdAddress": "" })).unwrap();
        assert_eq!(cleared.normalized().unwrap_err().to_string(), "prod-address is required");
    }

    #[test]
    fn test_merge_patch_only_touches_given_keys() {
        let base = config("http://prod", "http://shadow");
        let merged = base
            .merge_patch(serde_json::json!({ "shadow-address": "http://shadow2" }))
            .unwrap();
        assert_eq!(merged.prod_address, "http://prod");
        assert_eq!(merged.shadow_address, "http://shadow2");
        assert_eq!(merged.proxy_port, base.proxy_port);
    }

    #[test]
    fn test_merge_patch_rejects_bad_documents() {
        let base = config("http://prod", "");
        assert!(base.merge_patch(serde_json::json!(["not", "an", "object"])).is_err());
        assert!(base.merge_patch(serde_json::json!({ "proxy-port": "eighty" })).is_err());
        assert!(base.merge_patch(serde_json::json!({ "no-such-key": 1 })).is_err());
    }

    #[test]
    fn test_load_yaml_file() {
        let path = std::env::temp_dir().join(format!("tandem-config-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "prod-address: prod.example.com:8080").unwrap();
        writeln!(file, "shadow-address: shadow.example.com:8080").unwrap();
        writeln!(file, "proxy-port: 9090").unwrap();
        drop(file);

        let cfg = GatewayConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.prod_address, "prod.example.com:8080");
        assert_eq!(cfg.proxy_port, 9090);
        assert_eq!(cfg.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
        assert!(cfg.shadow_enabled());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(GatewayConfig::load("/nonexistent/tandem.yaml").is_err());
        assert!(GatewayConfig::load("").is_err());
    }
}
