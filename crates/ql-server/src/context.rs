//! Service-oriented application context.
//!
//! [`AppContext`] is the central struct shared across all route handlers via
//! Axum state. It wraps immutable infrastructure (DB pool, event bus) in
//! `Arc`s and the pipeline engine in a [`ConfigStore`] with hot-reload
//! support.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use ql_core::config::Config;
use ql_core::events::EventBus;
use ql_core::{Error, Result};
use ql_db::pool::DbPool;
use ql_pipeline::{
    Catalog, CatalogDef, Collaborators, Outbound, Services, StepRegistry, SubjectStore,
    UserDirectory,
};

use crate::notifications::HttpOutbound;
use crate::stores::{SqliteStore, SqliteUsers};
use crate::templates::load_templates;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Collaborators that survive a catalog reload.
#[derive(Clone)]
pub struct Wiring {
    pub store: Arc<dyn SubjectStore>,
    pub users: Arc<dyn UserDirectory>,
    pub outbound: Arc<dyn Outbound>,
    pub queue: Arc<EventBus>,
}

/// Load the catalog named by `config`, or an empty one when none is set.
pub fn load_catalog(config: &Config) -> Result<Catalog> {
    let registry = StepRegistry::builtin().strict(config.catalog.strict);
    match &config.catalog.path {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|e| {
                Error::Configuration(format!("cannot read catalog {}: {e}", path.display()))
            })?;
            Catalog::from_json(&json, &registry)
        }
        None => Catalog::from_def(&CatalogDef::default(), &registry),
    }
}

/// Build a fresh engine from `config` around the long-lived `wiring`.
pub fn build_services(config: &Config, wiring: &Wiring) -> Result<Services> {
    let catalog = load_catalog(config)?;
    let templates = load_templates(config.templates.dir.as_deref())?;
    if let Some(layout) = &config.templates.layout {
        if !templates.contains(layout) {
            return Err(Error::Configuration(format!(
                "layout template '{layout}' not found"
            )));
        }
    }

    tracing::info!(
        content_types = catalog.content_types().count(),
        actions = catalog.action_count(),
        templates = templates.len(),
        "Action catalog loaded"
    );

    Ok(Services::new(
        Arc::new(catalog),
        wiring.store.clone(),
        Collaborators {
            templates: Arc::new(templates),
            outbound: wiring.outbound.clone(),
            users: wiring.users.clone(),
            queue: wiring.queue.clone(),
            max_delegation_depth: config.catalog.max_delegation_depth,
        },
    ))
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

/// The live engine, swappable at runtime.
///
/// Requests take an `Arc` snapshot via [`ConfigStore::services`], so a reload
/// never disturbs requests already in flight.
pub struct ConfigStore {
    services: RwLock<Arc<Services>>,
    layout: RwLock<Option<String>>,
    wiring: Wiring,
    /// Path to the config file to re-read on reload (None = reuse `config`).
    config_path: Option<PathBuf>,
    config: Config,
}

impl ConfigStore {
    /// Build the initial engine. Fails if the catalog does not validate.
    pub fn new(config: &Config, config_path: Option<PathBuf>, wiring: Wiring) -> Result<Self> {
        let services = build_services(config, &wiring)?;
        Ok(Self {
            services: RwLock::new(Arc::new(services)),
            layout: RwLock::new(config.templates.layout.clone()),
            wiring,
            config_path,
            config: config.clone(),
        })
    }

    /// Snapshot of the current engine.
    pub fn services(&self) -> Arc<Services> {
        self.services.read().clone()
    }

    /// Name of the layout template wrapping partial HTML bodies.
    pub fn layout(&self) -> Option<String> {
        self.layout.read().clone()
    }

    /// Re-read the config file (if any), rebuild the catalog and templates,
    /// and swap them in. On failure the running engine is kept.
    pub fn reload(&self) -> Result<Arc<Services>> {
        let config = match &self.config_path {
            Some(path) => read_config(path)?,
            None => self.config.clone(),
        };

        let services = match build_services(&config, &self.wiring) {
            Ok(services) => Arc::new(services),
            Err(e) => {
                tracing::warn!("Reload rejected, keeping current catalog: {e}");
                return Err(e);
            }
        };

        *self.services.write() = services.clone();
        *self.layout.write() = config.templates.layout.clone();
        tracing::info!("Action catalog reloaded");
        Ok(services)
    }
}

fn read_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("cannot read config {}: {e}", path.display()))
    })?;
    Config::from_json(&contents)
}

// ---------------------------------------------------------------------------
// AppContext
// ---------------------------------------------------------------------------

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppContext {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub config_store: Arc<ConfigStore>,
    pub event_bus: Arc<EventBus>,
    pub outbound: Arc<dyn Outbound>,
}

impl AppContext {
    /// Wire the SQLite collaborators and the HTTP outbound client around
    /// `db` and load the engine.
    pub fn new(config: Config, config_path: Option<PathBuf>, db: DbPool) -> Result<Self> {
        let event_bus = Arc::new(EventBus::default());
        let outbound: Arc<dyn Outbound> = Arc::new(HttpOutbound::new());
        let wiring = Wiring {
            store: Arc::new(SqliteStore::new(db.clone())),
            users: Arc::new(SqliteUsers::new(db.clone())),
            outbound: outbound.clone(),
            queue: event_bus.clone(),
        };
        let config_store = Arc::new(ConfigStore::new(&config, config_path, wiring)?);

        Ok(Self {
            db,
            config: Arc::new(config),
            config_store,
            event_bus,
            outbound,
        })
    }
}
