//! Fragments: identifiers, per-kind configuration and the render capability
//!
//! A fragment kind is registered once with an immutable [`FragmentConfig`].
//! Every mounted instance of that kind shares the same `Arc<FragmentConfig>`;
//! nothing about the kind is mutated after registration.

use async_trait::async_trait;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::RouterConfig;
use crate::error::ConfigurationError;
use crate::render::RenderContext;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Key addressing a mounted fragment within one session.
///
/// Also used verbatim as the container element id and as the SSE event name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId(String);

impl FragmentId {
    /// Prefix reserved for instance-derived ids
    pub const DERIVED_PREFIX: &'static str = "cid_";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id for a fragment without an explicit one. Unique for the
    /// lifetime of the process.
    pub fn derived() -> Self {
        let n = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        Self(format!("{}{}", Self::DERIVED_PREFIX, n))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_derived(&self) -> bool {
        self.0.starts_with(Self::DERIVED_PREFIX)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FragmentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FragmentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for FragmentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Render capability every fragment implements.
///
/// `kind` selects the registered [`FragmentConfig`]; `render` appends markup
/// to the context buffer.
#[async_trait]
pub trait Fragment: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    async fn render(&self, ctx: &mut RenderContext) -> anyhow::Result<()>;
}

/// Immutable per-kind configuration, built at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentConfig {
    kind: &'static str,
    id: Option<FragmentId>,
    url: String,
    class: Option<String>,
    loader_class: String,
    reload_on: Vec<&'static str>,
    preload: Option<String>,
}

impl FragmentConfig {
    pub fn builder(kind: &'static str) -> FragmentConfigBuilder {
        FragmentConfigBuilder {
            kind,
            id: None,
            path: None,
            prefix: None,
            class: None,
            reload_on: Vec::new(),
            preload: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Stable id shared by every mount of this kind, if configured
    pub fn explicit_id(&self) -> Option<&FragmentId> {
        self.id.as_ref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn class(&self) -> Option<&str> {
        self.class.as_deref()
    }

    pub fn loader_class(&self) -> &str {
        &self.loader_class
    }

    /// State field names whose mutation reloads this fragment
    pub fn reload_on(&self) -> &[&'static str] {
        &self.reload_on
    }

    /// Markup shown inside the container until the first load completes
    pub fn preload(&self) -> Option<&str> {
        self.preload.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct FragmentConfigBuilder {
    kind: &'static str,
    id: Option<String>,
    path: Option<String>,
    prefix: Option<String>,
    class: Option<String>,
    reload_on: Vec<&'static str>,
    preload: Option<String>,
}

impl FragmentConfigBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Endpoint path segment; defaults to the kind name
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Endpoint prefix; defaults to the router's loader prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn reload_on<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = &'static str>,
    {
        for field in fields {
            if !self.reload_on.contains(&field) {
                self.reload_on.push(field);
            }
        }
        self
    }

    pub fn preload(mut self, markup: impl Into<String>) -> Self {
        self.preload = Some(markup.into());
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Validate and freeze the configuration.
    ///
    /// `schema_fields` is `None` when the router has no state schema.
    pub fn build(
        self,
        router: &RouterConfig,
        schema_fields: Option<&[&'static str]>,
    ) -> Result<FragmentConfig, ConfigurationError> {
        let kind = self.kind;

        if let Some(id) = &self.id {
            validate_explicit_id(kind, id)?;
        }

        if !self.reload_on.is_empty() {
            if self.id.is_none() {
                return Err(ConfigurationError::ReloadWithoutId {
                    kind: kind.to_string(),
                });
            }
            let fields = schema_fields.ok_or_else(|| ConfigurationError::ReloadWithoutSchema {
                kind: kind.to_string(),
            })?;
            if let Some(missing) = self.reload_on.iter().find(|f| !fields.contains(*f)) {
                return Err(ConfigurationError::UnknownField {
                    kind: kind.to_string(),
                    field: missing.to_string(),
                });
            }
        }

        let url = router.fragment_url(self.prefix.as_deref(), self.path.as_deref().unwrap_or(kind));

        Ok(FragmentConfig {
            kind,
            id: self.id.map(FragmentId::new),
            url,
            class: self.class,
            loader_class: router.loader_class.clone(),
            reload_on: self.reload_on,
            preload: self.preload,
        })
    }
}

fn validate_explicit_id(kind: &str, id: &str) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidId {
        kind: kind.to_string(),
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if id.is_empty() {
        return Err(invalid("empty"));
    }
    // Used raw in the query string and as a `#id` selector
    if !id.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(invalid("must start with an ASCII letter"));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(invalid(&format!("character {:?} outside [A-Za-z0-9_-]", c)));
    }
    if id.starts_with(FragmentId::DERIVED_PREFIX) {
        return Err(invalid("prefix is reserved for derived ids"));
    }
    Ok(())
}

/// Registered fragment kinds, in registration order
#[derive(Debug, Default)]
pub struct FragmentCatalog {
    configs: Vec<Arc<FragmentConfig>>,
    by_kind: HashMap<&'static str, usize>,
}

impl FragmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        config: FragmentConfig,
    ) -> Result<Arc<FragmentConfig>, ConfigurationError> {
        if self.by_kind.contains_key(config.kind()) {
            return Err(ConfigurationError::DuplicateKind {
                kind: config.kind().to_string(),
            });
        }
        if let Some(existing) = self.configs.iter().find(|c| c.url() == config.url()) {
            return Err(ConfigurationError::DuplicateRoute {
                kind: config.kind().to_string(),
                url: config.url().to_string(),
                existing: existing.kind().to_string(),
            });
        }

        let config = Arc::new(config);
        self.by_kind.insert(config.kind(), self.configs.len());
        self.configs.push(config.clone());
        Ok(config)
    }

    pub fn get(&self, kind: &str) -> Result<Arc<FragmentConfig>, ConfigurationError> {
        self.by_kind
            .get(kind)
            .map(|&index| self.configs[index].clone())
            .ok_or_else(|| ConfigurationError::UnregisteredKind {
                kind: kind.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FragmentConfig>> {
        self.configs.iter()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
