//! Per-generation set of configured needles.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::config::schema::NeedleConfig;
use crate::needleware::client::Protocol;
use crate::needleware::needle::{BasicNeedle, Needle};
use crate::needleware::notifier::CloseNotifier;
use crate::needleware::policy::Policy;
use crate::needleware::resolver::NeedleResolver;
use crate::needleware::with_meta::NeedleWithMeta;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NeedleStatus {
    Enabled,
    Disabled,
}

/// Runtime view of one needle definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeedleInfo {
    pub status: NeedleStatus,
    pub errors: Vec<String>,
    pub used_by_tcp_routes: Vec<String>,
    pub used_by_udp_routes: Vec<String>,
}

impl NeedleInfo {
    fn enabled() -> Self {
        Self {
            status: NeedleStatus::Enabled,
            errors: Vec::new(),
            used_by_tcp_routes: Vec::new(),
            used_by_udp_routes: Vec::new(),
        }
    }

    fn disabled(error: String) -> Self {
        Self {
            status: NeedleStatus::Disabled,
            errors: vec![error],
            ..Self::enabled()
        }
    }
}

/// Name → needle map, immutable once routes are bound.
///
/// Dropping the manager drops its needles; clients still referenced by
/// queued close notifications live until those deliveries finish.
#[derive(Debug)]
pub struct Manager {
    needles: HashMap<String, Arc<BasicNeedle>>,
    infos: BTreeMap<String, NeedleInfo>,
}

impl Manager {
    /// Build every definition independently; broken ones are logged and skipped.
    pub fn build(configs: &BTreeMap<String, NeedleConfig>, notifier: CloseNotifier) -> Self {
        let mut needles = HashMap::with_capacity(configs.len());
        let mut infos = BTreeMap::new();

        for (name, config) in configs {
            match NeedleResolver::new(name, config).build() {
                Ok((policy, client)) => {
                    tracing::info!(
                        needle = %name,
                        endpoint = %policy.endpoint,
                        timeout = ?policy.timeout,
                        on_timeout = %policy.on_timeout,
                        on_error = %policy.on_error,
                        "Needle enabled"
                    );
                    metrics::record_needle_build("ok");
                    let needle = BasicNeedle::new(name.clone(), client, policy, notifier.clone());
                    needles.insert(name.clone(), Arc::new(needle));
                    infos.insert(name.clone(), NeedleInfo::enabled());
                }
                Err(e) => {
                    tracing::error!(needle = %name, error = %e, "Skipping invalid needle definition");
                    metrics::record_needle_build("error");
                    infos.insert(name.clone(), NeedleInfo::disabled(e.to_string()));
                }
            }
        }

        Self { needles, infos }
    }

    /// Look up `name`, decorated with `metadata` when given.
    pub fn get_needle(
        &self,
        name: &str,
        metadata: Option<&HashMap<String, String>>,
    ) -> Option<Arc<dyn Needle>> {
        let needle: Arc<dyn Needle> = self.needles.get(name)?.clone();
        match metadata {
            None => Some(needle),
            Some(metadata) => Some(Arc::new(NeedleWithMeta::new(needle, metadata.clone()))),
        }
    }

    pub fn policy(&self, name: &str) -> Option<&Policy> {
        self.needles.get(name).map(|n| n.policy())
    }

    pub fn len(&self) -> usize {
        self.needles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }

    pub fn infos(&self) -> &BTreeMap<String, NeedleInfo> {
        &self.infos
    }

    /// Record that `route` refers to needle `name`.
    pub fn mark_used_by(&mut self, name: &str, protocol: Protocol, route: &str) {
        let Some(info) = self.infos.get_mut(name) else {
            return;
        };
        let routes = match protocol {
            Protocol::Tcp => &mut info.used_by_tcp_routes,
            Protocol::Udp => &mut info.used_by_udp_routes,
        };
        routes.push(route.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::needleware::policy::DecisionRef;
    use std::time::Duration;

    fn needle(endpoint: &str) -> NeedleConfig {
        NeedleConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        }
    }

    fn configs() -> BTreeMap<String, NeedleConfig> {
        let mut invalid = needle("127.0.0.1:1");
        invalid.decision.on_timeout = "maybe".into();
        BTreeMap::from([
            ("good".to_string(), needle("127.0.0.1:1")),
            ("maybe".to_string(), invalid),
            ("blank".to_string(), needle("")),
        ])
    }

    #[tokio::test]
    async fn invalid_definitions_are_skipped() {
        let manager = Manager::build(&configs(), CloseNotifier::default());
        assert_eq!(manager.len(), 1);
        assert!(manager.get_needle("maybe", None).is_none());
        assert!(manager.get_needle("blank", None).is_none());
        assert!(manager.get_needle("missing", None).is_none());

        let info = &manager.infos()["maybe"];
        assert_eq!(info.status, NeedleStatus::Disabled);
        assert!(info.errors[0].contains("maybe"));
        assert_eq!(manager.infos()["good"].status, NeedleStatus::Enabled);
    }

    #[tokio::test]
    async fn valid_definition_resolves_defaults() {
        let manager = Manager::build(&configs(), CloseNotifier::default());
        let needle = manager.get_needle("good", None).unwrap();
        assert_eq!(needle.name(), "good");
        let c = needle.new_tcp_criteria("10.0.0.1:4321", "10.0.0.2:80").unwrap();
        assert!(c.metadata.is_none());

        let policy = manager.policy("good").unwrap();
        assert_eq!(policy.timeout, Duration::from_secs(5));
        assert_eq!(policy.on_timeout, DecisionRef::Reject);
        assert_eq!(policy.on_error, DecisionRef::Reject);
    }

    #[tokio::test]
    async fn metadata_lookup_returns_a_decorated_needle() {
        let manager = Manager::build(&configs(), CloseNotifier::default());
        let metadata = HashMap::from([("tenant".to_string(), "a".to_string())]);
        let needle = manager.get_needle("good", Some(&metadata)).unwrap();
        let c = needle.new_tcp_criteria("10.0.0.1:4321", "10.0.0.2:80").unwrap();
        assert_eq!(c.metadata, Some(metadata));

        let bare = manager.get_needle("good", None).unwrap();
        assert!(bare.new_tcp_criteria("10.0.0.1:4321", "10.0.0.2:80").unwrap().metadata.is_none());
    }

    #[tokio::test]
    async fn tracks_route_usage() {
        let mut manager = Manager::build(&configs(), CloseNotifier::default());
        manager.mark_used_by("good", Protocol::Tcp, "postgres");
        manager.mark_used_by("good", Protocol::Udp, "dns");
        manager.mark_used_by("missing", Protocol::Tcp, "ignored");

        let info = &manager.infos()["good"];
        assert_eq!(info.used_by_tcp_routes, vec!["postgres"]);
        assert_eq!(info.used_by_udp_routes, vec!["dns"]);
        assert!(!manager.infos().contains_key("missing"));
    }
}
