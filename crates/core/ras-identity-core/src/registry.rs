//! Broker type registry and the startup-time build of the broker set.

use crate::identifier::Identifier;
use crate::identity::BrokerConfig;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Builds an identifier from its broker config. `Ok(None)` means the factory
/// declined to produce one, which is a configuration defect.
pub type BrokerFactory =
    Arc<dyn Fn(&BrokerConfig) -> Result<Option<Arc<dyn Identifier>>, BoxError> + Send + Sync>;

/// Configuration defects found while building the broker set. Any of these
/// must stop the process before it serves a request.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("broker '{id}': unknown broker type '{broker_type}'")]
    UnknownType { id: String, broker_type: String },

    #[error("broker '{id}' (type '{broker_type}'): factory failed: {source}")]
    FactoryFailed {
        id: String,
        broker_type: String,
        #[source]
        source: BoxError,
    },

    #[error("broker '{id}' (type '{broker_type}'): factory produced no identifier")]
    NoInstance { id: String, broker_type: String },

    #[error("broker '{0}' is configured more than once")]
    DuplicateId(String),

    #[error("broker '{id}': identifier reports broker id '{reported}'")]
    IdMismatch { id: String, reported: String },
}

/// Maps broker type names to factories. Assembled at process initialization
/// and passed explicitly to wherever the broker set is built.
#[derive(Clone, Default)]
pub struct BrokerRegistry {
    factories: HashMap<String, BrokerFactory>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, broker_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&BrokerConfig) -> Result<Option<Arc<dyn Identifier>>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(broker_type.into(), Arc::new(factory));
        self
    }

    pub fn broker_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Build one identifier per config, in config order.
    pub fn build(&self, configs: &[BrokerConfig]) -> Result<Brokers, RegistryError> {
        let mut ordered = Vec::with_capacity(configs.len());
        let mut index = HashMap::with_capacity(configs.len());

        for config in configs {
            if index.contains_key(&config.id) {
                return Err(RegistryError::DuplicateId(config.id.clone()));
            }

            let factory = self.factories.get(&config.broker_type).ok_or_else(|| {
                RegistryError::UnknownType {
                    id: config.id.clone(),
                    broker_type: config.broker_type.clone(),
                }
            })?;

            let identifier = factory(config)
                .map_err(|source| RegistryError::FactoryFailed {
                    id: config.id.clone(),
                    broker_type: config.broker_type.clone(),
                    source,
                })?
                .ok_or_else(|| RegistryError::NoInstance {
                    id: config.id.clone(),
                    broker_type: config.broker_type.clone(),
                })?;

            if identifier.broker_id() != config.id {
                return Err(RegistryError::IdMismatch {
                    id: config.id.clone(),
                    reported: identifier.broker_id().to_string(),
                });
            }

            debug!(broker = %config.id, broker_type = %config.broker_type, "Built broker");
            index.insert(config.id.clone(), ordered.len());
            ordered.push(identifier);
        }

        info!("Configured {} identity broker(s)", ordered.len());
        Ok(Brokers { ordered, index })
    }
}

/// The configured identifiers, immutable for the process lifetime.
#[derive(Clone)]
pub struct Brokers {
    ordered: Vec<Arc<dyn Identifier>>,
    index: HashMap<String, usize>,
}

impl Brokers {
    pub fn get(&self, broker_id: &str) -> Option<&Arc<dyn Identifier>> {
        self.index.get(broker_id).map(|&i| &self.ordered[i])
    }

    pub fn contains(&self, broker_id: &str) -> bool {
        self.index.contains_key(broker_id)
    }

    /// Broker ids in configuration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|identifier| identifier.broker_id())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Identifier>> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl std::fmt::Debug for Brokers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdentityResult;
    use crate::identifier::{AuthOutcome, AuthRequest};
    use crate::store::IdentityStore;
    use async_trait::async_trait;
    use url::Url;

    struct NamedIdentifier {
        id: String,
    }

    #[async_trait]
    impl Identifier for NamedIdentifier {
        fn broker_id(&self) -> &str {
            &self.id
        }

        async fn authenticate(&self, _: &AuthRequest, _: &mut IdentityStore) -> AuthOutcome {
            AuthOutcome::denied("not used")
        }

        async fn callback(&self, _: &AuthRequest, _: &mut IdentityStore) -> AuthOutcome {
            AuthOutcome::denied("not used")
        }

        async fn logout_redirect_url(
            &self,
            _: &AuthRequest,
            _: &IdentityStore,
        ) -> IdentityResult<Option<Url>> {
            Ok(None)
        }
    }

    fn registry() -> BrokerRegistry {
        BrokerRegistry::new()
            .register("named", |config: &BrokerConfig| {
                Ok(Some(Arc::new(NamedIdentifier {
                    id: config.id.clone(),
                }) as Arc<dyn Identifier>))
            })
            .register("broken", |_: &BrokerConfig| Err("missing client_id".into()))
            .register("empty", |_: &BrokerConfig| Ok(None))
            .register("liar", |_: &BrokerConfig| {
                Ok(Some(Arc::new(NamedIdentifier {
                    id: "someone-else".to_string(),
                }) as Arc<dyn Identifier>))
            })
    }

    #[test]
    fn test_build_preserves_config_order() {
        let brokers = registry()
            .build(&[
                BrokerConfig::new("local", "named"),
                BrokerConfig::new("sso", "named"),
                BrokerConfig::new("partner", "named"),
            ])
            .unwrap();

        assert_eq!(brokers.ids().collect::<Vec<_>>(), vec!["local", "sso", "partner"]);
        assert_eq!(brokers.len(), 3);
        assert!(brokers.contains("sso"));
        assert!(brokers.get("nonexistent").is_none());
        assert_eq!(brokers.get("partner").unwrap().broker_id(), "partner");
    }

    #[test]
    fn test_unknown_type_names_broker() {
        let err = registry()
            .build(&[BrokerConfig::new("sso", "saml")])
            .unwrap_err();

        match &err {
            RegistryError::UnknownType { id, broker_type } => {
                assert_eq!(id, "sso");
                assert_eq!(broker_type, "saml");
            }
            other => panic!("Expected UnknownType, got: {:?}", other),
        }
        assert!(err.to_string().contains("sso"));
        assert!(err.to_string().contains("saml"));
    }

    #[test]
    fn test_factory_failure_and_missing_instance() {
        let err = registry()
            .build(&[BrokerConfig::new("sso", "broken")])
            .unwrap_err();
        assert!(matches!(err, RegistryError::FactoryFailed { .. }));
        assert!(err.to_string().contains("missing client_id"));

        let err = registry()
            .build(&[BrokerConfig::new("sso", "empty")])
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoInstance { .. }));
    }

    #[test]
    fn test_duplicate_and_mismatched_ids() {
        let err = registry()
            .build(&[
                BrokerConfig::new("local", "named"),
                BrokerConfig::new("local", "named"),
            ])
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(ref id) if id == "local"));

        let err = registry()
            .build(&[BrokerConfig::new("sso", "liar")])
            .unwrap_err();
        assert!(matches!(err, RegistryError::IdMismatch { .. }));
    }

    #[test]
    fn test_broker_types_sorted() {
        assert_eq!(
            registry().broker_types(),
            vec!["broken", "empty", "liar", "named"]
        );
    }
}
