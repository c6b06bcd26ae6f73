use std::sync::Arc;

use tsuzuki_api::anilist::AniListProvider;
use tsuzuki_api::mal::MalProvider;
use tsuzuki_core::config::AppConfig;
use tsuzuki_sync::{AniListTracker, DbHandle, LocalTracker, MalTracker, TrackerRegistry};

use crate::CliError;

/// Everything a command needs: file config, store handle and trackers.
pub struct App {
    pub config: AppConfig,
    pub db: DbHandle,
    pub registry: Arc<TrackerRegistry>,
}

impl App {
    pub fn open() -> Result<Self, CliError> {
        let config = AppConfig::load()?;
        let path = AppConfig::ensure_db_path()?;
        tracing::debug!(path = %path.display(), "opening store");
        let db = DbHandle::open(&path)?;
        let registry = Arc::new(build_registry(&config, &db));
        Ok(Self {
            config,
            db,
            registry,
        })
    }
}

/// Local tracker plus every remote service that is enabled and has a client ID.
pub fn build_registry(config: &AppConfig, db: &DbHandle) -> TrackerRegistry {
    let mut registry = TrackerRegistry::new(db.clone());
    registry.register(Arc::new(LocalTracker::new(db.clone())));

    let anilist = &config.services.anilist;
    if anilist.enabled {
        match &anilist.client_id {
            Some(client_id) => {
                let provider = AniListProvider::new(
                    client_id.clone(),
                    anilist.client_secret.clone().unwrap_or_default(),
                );
                registry.register(Arc::new(AniListTracker::new(provider, db.clone())));
            }
            None => tracing::warn!("anilist is enabled but services.anilist.client_id is not set"),
        }
    }

    let mal = &config.services.mal;
    if mal.enabled {
        match &mal.client_id {
            Some(client_id) => {
                let provider = MalProvider::new(client_id.clone());
                registry.register(Arc::new(MalTracker::new(provider, db.clone())));
            }
            None => tracing::warn!("mal is enabled but services.mal.client_id is not set"),
        }
    }

    registry
}
