//! Handler registry: factory manifest, spec resolution, instantiation.
//!
//! Discovery is an explicit registration table rather than filesystem
//! scanning: a [`Manifest`] maps locator strings to factory closures,
//! populated at startup (built-ins plus whatever the embedding application
//! registers). A spec's `module` locator is resolved against the configured
//! `handler_search_path` namespace prefixes in order, with the bare locator
//! tried last, preserving configure-by-name ergonomics without runtime
//! reflection.
//!
//! `Registry::load` instantiates each enabled spec exactly once; any model or
//! resource state a handler allocates is amortized across all sessions that
//! later lease it.

use crate::config::{ChatEngineConfig, HandlerSpec};
use crate::error::{EngineError, Result};
use crate::handler::Handler;
use crate::lease::LeasePool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a factory may need to build its handler.
pub struct FactoryContext<'a> {
    /// Configured handler name (for error messages).
    pub name: &'a str,
    /// Root directory for model/resource files.
    pub model_root: &'a Path,
    /// Handler-specific parameter table from the spec.
    pub params: &'a toml::Table,
}

impl FactoryContext<'_> {
    /// An `InvalidParameter` error attributed to this handler.
    pub fn invalid(&self, reason: impl Into<String>) -> EngineError {
        EngineError::InvalidParameter {
            handler: self.name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Builds one handler instance from validated parameters.
pub type HandlerFactory = Arc<dyn Fn(&FactoryContext<'_>) -> Result<Arc<dyn Handler>> + Send + Sync>;

/// Startup-time mapping from module locator to factory.
#[derive(Default, Clone)]
pub struct Manifest {
    entries: BTreeMap<String, HandlerFactory>,
}

impl Manifest {
    /// An empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// The manifest of built-in handlers, all under the `builtin/` namespace.
    pub fn builtin() -> Self {
        let mut manifest = Self::new();
        crate::handlers::register_builtins(&mut manifest);
        manifest
    }

    /// Register a factory under `locator`. Later registrations under the
    /// same locator replace earlier ones.
    pub fn register<F>(&mut self, locator: impl Into<String>, factory: F)
    where
        F: Fn(&FactoryContext<'_>) -> Result<Arc<dyn Handler>> + Send + Sync + 'static,
    {
        self.entries.insert(locator.into(), Arc::new(factory));
    }

    /// Resolve a module locator against the search path.
    fn resolve(&self, search_path: &[String], locator: &str) -> Option<&HandlerFactory> {
        for prefix in search_path {
            if let Some(factory) = self.entries.get(&format!("{prefix}/{locator}")) {
                return Some(factory);
            }
        }
        self.entries.get(locator)
    }
}

/// A loaded handler instance with its spec and lease pool.
pub struct RegisteredHandler {
    spec: HandlerSpec,
    handler: Arc<dyn Handler>,
    pool: LeasePool,
}

impl RegisteredHandler {
    /// The shared handler instance. Repeated calls return the same instance.
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }

    /// The instance's lease pool.
    pub fn pool(&self) -> &LeasePool {
        &self.pool
    }

    /// The spec this instance was built from.
    pub fn spec(&self) -> &HandlerSpec {
        &self.spec
    }
}

/// Process-wide singleton holding every instantiated handler. Initialized
/// once at startup; read-only afterwards.
pub struct Registry {
    handlers: BTreeMap<String, RegisteredHandler>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Instantiate every enabled spec in the chat-engine config.
    ///
    /// Disabled specs are parsed but inert. Handler construction may load
    /// model weights; it runs exactly once per instance, here.
    ///
    /// # Errors
    ///
    /// `HandlerNotFound`, `DuplicateHandler` or `InvalidParameter`; all fatal
    /// at startup.
    pub fn load(manifest: Manifest, config: &ChatEngineConfig) -> Result<Self> {
        Self::load_entries(
            manifest,
            &config.model_root,
            &config.handler_search_path,
            config.handler_configs.iter().map(|(n, s)| (n.as_str(), s)),
        )
    }

    /// As [`Registry::load`], from explicit `(name, spec)` entries.
    ///
    /// # Errors
    ///
    /// See [`Registry::load`].
    pub fn load_entries<'a>(
        manifest: Manifest,
        model_root: &Path,
        search_path: &[String],
        entries: impl IntoIterator<Item = (&'a str, &'a HandlerSpec)>,
    ) -> Result<Self> {
        let mut handlers = BTreeMap::new();

        for (name, spec) in entries {
            if handlers.contains_key(name) {
                return Err(EngineError::DuplicateHandler(name.to_owned()));
            }
            if !spec.enabled {
                debug!(handler = name, "spec disabled, not instantiating");
                continue;
            }

            let factory = manifest
                .resolve(search_path, &spec.module)
                .ok_or_else(|| EngineError::HandlerNotFound(spec.module.clone()))?;

            let ctx = FactoryContext {
                name,
                model_root,
                params: &spec.params,
            };
            let handler = factory(&ctx)?;

            let built = handler.descriptor().capability;
            if built != spec.capability {
                return Err(ctx.invalid(format!(
                    "capability mismatch: spec declares {}, module \"{}\" implements {}",
                    spec.capability, spec.module, built
                )));
            }

            info!(
                handler = name,
                module = %spec.module,
                capability = %spec.capability,
                limit = ?spec.concurrency_limit,
                "handler loaded"
            );
            handlers.insert(
                name.to_owned(),
                RegisteredHandler {
                    pool: LeasePool::new(name, spec.concurrency_limit),
                    handler,
                    spec: spec.clone(),
                },
            );
        }

        Ok(Self { handlers })
    }

    /// Look up a loaded handler by name. Idempotent; always the same shared
    /// instance. Disabled or unknown names return `None`.
    pub fn get(&self, name: &str) -> Option<&RegisteredHandler> {
        self.handlers.get(name)
    }

    /// Names of all loaded handlers.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of loaded handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler was loaded.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::config::EngineConfig;
    use crate::handler::Capability;

    fn spec(module: &str, capability: &str) -> HandlerSpec {
        toml::from_str(&format!(
            "module = \"{module}\"\ncapability = \"{capability}\"\n"
        ))
        .unwrap()
    }

    fn search() -> Vec<String> {
        vec!["builtin".to_owned()]
    }

    #[test]
    fn loads_builtins_from_config() {
        let config = EngineConfig::from_toml(
            r#"
[chat_engine.handler_configs.vad]
module = "vad/energy"
capability = "vad"
concurrency_limit = 2

[chat_engine.handler_configs.asr]
module = "asr/echo"
capability = "asr"
"#,
        )
        .unwrap();
        let registry = Registry::load(Manifest::builtin(), &config.chat_engine).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("vad").unwrap().pool().limit(), Some(2));
        assert_eq!(registry.get("asr").unwrap().pool().limit(), None);
    }

    #[test]
    fn unresolved_locator_fails() {
        let entries = [("x", spec("asr/imaginary", "asr"))];
        let err = Registry::load_entries(
            Manifest::builtin(),
            Path::new("models"),
            &search(),
            entries.iter().map(|(n, s)| (*n, s)),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::HandlerNotFound(ref l) if l == "asr/imaginary"));
        assert!(err.is_fatal_at_startup());
    }

    #[test]
    fn duplicate_name_fails() {
        let a = spec("asr/echo", "asr");
        let b = spec("asr/echo", "asr");
        let entries = [("asr", &a), ("asr", &b)];
        let err = Registry::load_entries(
            Manifest::builtin(),
            Path::new("models"),
            &search(),
            entries.iter().map(|(n, s)| (*n, *s)),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateHandler(ref n) if n == "asr"));
    }

    #[test]
    fn capability_mismatch_fails() {
        let entries = [("weird", spec("vad/energy", "asr"))];
        let err = Registry::load_entries(
            Manifest::builtin(),
            Path::new("models"),
            &search(),
            entries.iter().map(|(n, s)| (*n, s)),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { ref handler, .. } if handler == "weird"));
    }

    #[test]
    fn bad_factory_params_fail() {
        let mut s = spec("vad/energy", "vad");
        s.params
            .insert("speaking_threshold".to_owned(), toml::Value::Float(3.0));
        let entries = [("vad", &s)];
        let err = Registry::load_entries(
            Manifest::builtin(),
            Path::new("models"),
            &search(),
            entries.iter().map(|(n, s)| (*n, *s)),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter { .. }));
    }

    #[test]
    fn disabled_spec_is_parsed_but_inert() {
        let mut s = spec("asr/echo", "asr");
        s.enabled = false;
        let entries = [("asr", &s)];
        let registry = Registry::load_entries(
            Manifest::builtin(),
            Path::new("models"),
            &search(),
            entries.iter().map(|(n, s)| (*n, *s)),
        )
        .unwrap();
        assert!(registry.get("asr").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn get_returns_the_same_shared_instance() {
        let entries = [("llm", spec("llm/echo", "llm"))];
        let registry = Registry::load_entries(
            Manifest::builtin(),
            Path::new("models"),
            &search(),
            entries.iter().map(|(n, s)| (*n, s)),
        )
        .unwrap();
        let a = registry.get("llm").unwrap().handler();
        let b = registry.get("llm").unwrap().handler();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn search_path_namespaces_are_tried_in_order() {
        struct Probe(Capability);
        #[async_trait::async_trait]
        impl Handler for Probe {
            fn descriptor(&self) -> crate::handler::HandlerDescriptor {
                crate::handler::HandlerDescriptor {
                    capability: self.0,
                    inputs: &[crate::frames::FrameKind::Text],
                    output: crate::frames::FrameKind::Text,
                }
            }
            async fn process(
                &self,
                _session: crate::handler::SessionId,
                _input: crate::frames::Frame,
                _out: &tokio::sync::mpsc::Sender<crate::frames::Frame>,
            ) -> Result<()> {
                Ok(())
            }
        }

        let mut manifest = Manifest::new();
        manifest.register("contrib/llm/probe", |_ctx: &FactoryContext<'_>| {
            Ok(Arc::new(Probe(Capability::Llm)) as Arc<dyn Handler>)
        });
        // Same locator under a later namespace must not shadow the earlier one.
        manifest.register("extra/llm/probe", |_ctx: &FactoryContext<'_>| {
            Ok(Arc::new(Probe(Capability::Asr)) as Arc<dyn Handler>)
        });

        let entries = [("probe", spec("llm/probe", "llm"))];
        let registry = Registry::load_entries(
            manifest,
            Path::new("models"),
            &["contrib".to_owned(), "extra".to_owned()],
            entries.iter().map(|(n, s)| (*n, s)),
        )
        .unwrap();
        assert_eq!(
            registry.get("probe").unwrap().handler().descriptor().capability,
            Capability::Llm
        );
    }
}
