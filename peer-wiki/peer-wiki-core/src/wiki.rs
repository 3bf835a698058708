//! Assembles every component from one [`WikiConfig`].

use std::sync::Arc;

use rand::RngCore;
use tracing::{info, warn};

use crate::auth::{LoginThrottle, PortalHandshake, SessionKeys, TokenStore};
use crate::cache::CacheStore;
use crate::config::WikiConfig;
use crate::entries::EntryService;
use crate::error::Result;
use crate::index::EntryIndex;
use crate::loader::PageLoader;
use crate::markup::CommonMark;
use crate::path::PathResolver;
use crate::search::{LiveIndex, SearchIndex};
use crate::storage::GitStorage;
use crate::uploads::{BasicInspector, UploadIndex};
use crate::users::UserStore;

pub struct Wiki {
    pub config: WikiConfig,
    pub entries: Arc<EntryService>,
    pub users: Arc<UserStore>,
    pub sessions: Arc<SessionKeys>,
    pub portal: Option<Arc<PortalHandshake>>,
    pub throttle: Arc<LoginThrottle>,
    pub search: Arc<LiveIndex>,
}

impl Wiki {
    /// Open (or initialise) the repository and data directory.
    pub fn open(config: WikiConfig) -> Result<Self> {
        let index = SearchIndex::open(config.search_path())?;
        Self::with_search_index(config, index)
    }

    pub fn with_search_index(config: WikiConfig, search: SearchIndex) -> Result<Self> {
        std::fs::create_dir_all(&config.data_path)?;
        let paths = PathResolver::new(&config);
        let storage = Arc::new(GitStorage::open(&config.repo_path)?);
        let loader = PageLoader::new(
            paths.clone(),
            CacheStore::new(paths.clone()),
            Arc::new(CommonMark),
        );
        let live = Arc::new(LiveIndex::new(Arc::new(search)));
        let uploads = Arc::new(UploadIndex::open(
            config.repo_path.join("uploads"),
            config.data_file("uploads.json"),
            Box::new(BasicInspector),
        )?);
        let mut entries = EntryService::new(
            loader,
            paths,
            Arc::new(EntryIndex::open(config.data_file("entries.json"))?),
            storage,
            uploads,
            live.clone(),
        );
        if let Some(starter) = &config.starter_template {
            entries = entries.with_starter_file(starter);
        }

        let users = Arc::new(UserStore::open(config.data_file("users.json"))?);
        users.ensure_guest(config.public)?;
        if let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) {
            users.ensure_admin(email, password)?;
        }

        let secret = if config.session_secret.is_empty() {
            warn!("no session secret configured, sessions will not survive a restart");
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            bytes.to_vec()
        } else {
            config.session_secret.as_bytes().to_vec()
        };
        let sessions = Arc::new(SessionKeys::new(&secret, config.session_ttl));

        let portal = config.portal.clone().map(|portal| {
            info!(agent = %portal.agent_url, "portal login enabled");
            Arc::new(PortalHandshake::new(portal, Arc::new(TokenStore::new())))
        });

        Ok(Self {
            throttle: Arc::new(LoginThrottle::new(config.lockout.clone())),
            entries: Arc::new(entries),
            users,
            sessions,
            portal,
            search: live,
            config,
        })
    }
}
