//! Published runtime state
//!
//! The configuration and everything derived from it (engine clients,
//! passthrough proxy, shadow identity) live in one immutable [`Snapshot`].
//! Requests take the current snapshot once and use it to the end; updates
//! build a complete replacement first and only then swap the pointer, so a
//! rejected update leaves the published snapshot untouched.

use crate::metrics;
use crate::passthrough::Passthrough;
use crate::presto::PrestoClient;
use crate::shadow::ShadowIdentity;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tandem_common::{GatewayConfig, Result};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Snapshot {
    pub config: GatewayConfig,
    pub production: Arc<PrestoClient>,
    /// `None` when shadowing is disabled
    pub shadow: Option<Arc<PrestoClient>>,
    pub passthrough: Arc<Passthrough>,
    pub identity: ShadowIdentity,
}

impl Snapshot {
    /// Validate `candidate` and build every derived object from it
    pub fn build(candidate: &GatewayConfig) -> Result<Self> {
        let config = candidate.normalized()?;
        let insecure = config.insecure_skip_tls_verify;
        let connect_timeout = config.connect_timeout();

        let passthrough = Passthrough::new(&config.prod_address, insecure, connect_timeout)?;
        let production = PrestoClient::new(&config.prod_address, insecure, connect_timeout)?;
        let shadow = if config.shadow_enabled() {
            Some(Arc::new(PrestoClient::new(
                &config.shadow_address,
                insecure,
                connect_timeout,
            )?))
        } else {
            None
        };
        let identity = ShadowIdentity::with_prefix(config.shadow_query_id_prefix.clone());

        Ok(Self {
            config,
            production: Arc::new(production),
            shadow,
            passthrough: Arc::new(passthrough),
            identity,
        })
    }
}

pub struct RuntimeState {
    current: RwLock<Arc<Snapshot>>,
    /// Serializes writers so concurrent patches never lose an update
    update: Mutex<()>,
}

impl RuntimeState {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            update: Mutex::new(()),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        let snapshot = Snapshot::build(config)?;
        log_applied(&snapshot.config);
        Ok(Self::new(snapshot))
    }

    /// Current snapshot; take it once per request
    pub fn load(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Merge a partial JSON document onto the current configuration and publish it
    pub fn patch(&self, patch: serde_json::Value) -> Result<Arc<Snapshot>> {
        let _guard = self.update.lock();
        let candidate = self.load().config.merge_patch(patch)?;
        self.build_and_publish(&candidate)
    }

    fn build_and_publish(&self, candidate: &GatewayConfig) -> Result<Arc<Snapshot>> {
        let snapshot = match Snapshot::build(candidate) {
            Ok(snapshot) => Arc::new(snapshot),
            Err(e) => {
                metrics::record_config_reload("rejected");
                warn!(error = %e, code = e.code(), "configuration update rejected");
                return Err(e);
            }
        };

        let previous_port = self.load().config.proxy_port;
        if snapshot.config.proxy_port != previous_port {
            warn!(
                current = previous_port,
                requested = snapshot.config.proxy_port,
                "proxy-port changes take effect after restart"
            );
        }

        *self.current.write() = snapshot.clone();
        metrics::record_config_reload("applied");
        log_applied(&snapshot.config);
        Ok(snapshot)
    }
}

fn log_applied(config: &GatewayConfig) {
    info!(
        prod = %config.prod_address,
        shadow = %config.shadow_address,
        port = config.proxy_port,
        "configuration loaded"
    );
    if !config.shadow_enabled() {
        info!("shadow address not set; shadowing disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(prod: &str, shadow: &str) -> GatewayConfig {
        GatewayConfig {
            prod_address: prod.into(),
            shadow_address: shadow.into(),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn test_build_normalizes_and_derives_clients() {
        let snapshot = Snapshot::build(&config("prod.example.com/", "shadow.example.com")).unwrap();
        assert_eq!(snapshot.config.prod_address, "http://prod.example.com");
        assert_eq!(snapshot.production.base_url().as_str(), "http://prod.example.com/");
        assert_eq!(
            snapshot.shadow.as_ref().unwrap().base_url().as_str(),
            "http://shadow.example.com/"
        );
    }

    #[test]
    fn test_build_without_shadow() {
        let snapshot = Snapshot::build(&config("prod.example.com", "")).unwrap();
        assert!(snapshot.shadow.is_none());
    }

    #[test]
    fn test_rejected_update_keeps_published_snapshot() {
        let state = RuntimeState::from_config(&config("http://prod.example.com", "http://shadow.example.com")).unwrap();
        let before = state.load();

        let err = state
            .patch(serde_json::json!({ "shadow-address": "HTTP://PROD.example.com/" }))
            .unwrap_err();
        assert!(err.is_validation());

        let after = state.load();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&before.production, &after.production));
        assert!(Arc::ptr_eq(&before.passthrough, &after.passthrough));
    }

    #[test]
    fn test_patch_publishes_new_snapshot() {
        let state = RuntimeState::from_config(&config("http://prod.example.com", "")).unwrap();
        let before = state.load();

        let after = state
            .patch(serde_json::json!({ "shadow-address": "http://shadow.example.com", "shadow-query-id-prefix": "s_" }))
            .unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert!(Arc::ptr_eq(&after, &state.load()));
        assert!(after.shadow.is_some());
        assert_eq!(after.identity.derive("Q1"), "s_Q1");
        // readers holding the old snapshot still see the old world
        assert!(before.shadow.is_none());
    }

    #[test]
    fn test_bad_patch_document_is_rejected() {
        let state = RuntimeState::from_config(&config("http://prod.example.com", "")).unwrap();
        let before = state.load();
        assert!(state.patch(serde_json::json!({ "proxy-port": "nope" })).is_err());
        assert!(Arc::ptr_eq(&before, &state.load()));
    }
}
