//! Runtime configuration shared by every component.
//!
//! A single [`WikiConfig`] is built once at startup and handed to each
//! component's constructor; nothing reads configuration from globals.

use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extra character ranges (besides `a-z0-9/-`) kept by the path resolver.
#[derive(Clone, Debug)]
pub struct Charset {
    pub cjk: Vec<RangeInclusive<char>>,
    pub arabic: Vec<RangeInclusive<char>>,
}

impl Default for Charset {
    fn default() -> Self {
        Self {
            cjk: vec![
                '\u{3040}'..='\u{309F}',
                '\u{30A0}'..='\u{30FF}',
                '\u{3400}'..='\u{4DBF}',
                '\u{4E00}'..='\u{9FAF}',
                '\u{AC00}'..='\u{D7AF}',
                '\u{FF00}'..='\u{FFEF}',
            ],
            arabic: vec![
                '\u{0600}'..='\u{06FF}',
                '\u{0750}'..='\u{077F}',
                '\u{08A0}'..='\u{08FF}',
                '\u{FB50}'..='\u{FDFF}',
                '\u{FE70}'..='\u{FEFF}',
            ],
        }
    }
}

impl Charset {
    pub fn contains(&self, c: char) -> bool {
        self.cjk.iter().chain(self.arabic.iter()).any(|r| r.contains(&c))
    }
}

/// Settings for the campus portal handshake.
#[derive(Clone, Debug)]
pub struct PortalConfig {
    /// Where `/login/portal` sends the browser.
    pub agent_url: String,
    /// Secret shared with the identity agent.
    pub agent_secret: String,
    /// Domain appended to the agent's uid to form the e-mail address.
    pub email_domain: String,
    pub token_ttl: Duration,
    /// When non-empty, handshake requests must come from one of these.
    pub trusted_agents: Vec<IpAddr>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            agent_url: "https://i.cs.hku.hk/~plearn/".to_string(),
            agent_secret: String::new(),
            email_domain: "hku.hk".to_string(),
            token_ttl: Duration::from_secs(10),
            trusted_agents: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LockoutConfig {
    pub free_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    /// Failure history of a key is forgotten this long after its last failure.
    pub lifetime: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            free_retries: 5,
            min_wait: Duration::from_secs(60),
            max_wait: Duration::from_secs(5 * 60),
            lifetime: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WikiConfig {
    pub repo_path: PathBuf,
    pub data_path: PathBuf,
    pub session_secret: String,
    pub session_ttl: Duration,
    /// Whether anonymous visitors may read pages.
    pub public: bool,
    pub local_auth: bool,
    pub portal: Option<PortalConfig>,
    pub lockout: LockoutConfig,
    pub charset: Charset,
    /// Overrides the built-in starter page template.
    pub starter_template: Option<PathBuf>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl WikiConfig {
    pub fn new(repo_path: impl Into<PathBuf>, data_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            data_path: data_path.into(),
            session_secret: String::new(),
            session_ttl: Duration::from_secs(12 * 60 * 60),
            public: false,
            local_auth: true,
            portal: None,
            lockout: LockoutConfig::default(),
            charset: Charset::default(),
            starter_template: None,
            admin_email: None,
            admin_password: None,
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_path.join("cache")
    }

    pub fn search_path(&self) -> PathBuf {
        self.data_path.join("search")
    }

    pub fn data_file(&self, name: impl AsRef<Path>) -> PathBuf {
        self.data_path.join(name)
    }
}
