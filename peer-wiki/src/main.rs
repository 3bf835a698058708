use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use peer_wiki::api;
use peer_wiki_core::config::PortalConfig;
use peer_wiki_core::{Wiki, WikiConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "peer-wiki")]
#[command(about = "Git-backed collaborative wiki with campus portal login")]
struct Args {
    /// Listen address
    #[arg(long, env = "WIKI_ADDR", default_value = "127.0.0.1:3000")]
    addr: SocketAddr,

    /// Git working tree holding the page sources
    #[arg(long, env = "WIKI_REPO", default_value = "repo")]
    repo: PathBuf,

    /// Directory for the cache, search index and JSON tables
    #[arg(long, env = "WIKI_DATA", default_value = "data")]
    data: PathBuf,

    #[arg(long, env = "WIKI_SESSION_SECRET", default_value = "", hide_env_values = true)]
    session_secret: String,

    /// Let anonymous visitors read pages
    #[arg(long, env = "WIKI_PUBLIC")]
    public: bool,

    #[arg(long, env = "WIKI_DISABLE_LOCAL_AUTH")]
    disable_local_auth: bool,

    /// Secret shared with the identity agent; enables portal login
    #[arg(long, env = "WIKI_PORTAL_SECRET", hide_env_values = true)]
    portal_secret: Option<String>,

    #[arg(long, env = "WIKI_PORTAL_URL", default_value = "https://i.cs.hku.hk/~plearn/")]
    portal_url: String,

    #[arg(long, env = "WIKI_PORTAL_DOMAIN", default_value = "hku.hk")]
    portal_domain: String,

    /// Addresses allowed to request login tokens (any when empty)
    #[arg(long = "trusted-agent", env = "WIKI_TRUSTED_AGENTS", value_delimiter = ',')]
    trusted_agents: Vec<IpAddr>,

    /// Markdown template for new pages; `{TITLE}` is substituted
    #[arg(long, env = "WIKI_STARTER")]
    starter: Option<PathBuf>,

    #[arg(long, env = "WIKI_ADMIN_EMAIL")]
    admin_email: Option<String>,

    #[arg(long, env = "WIKI_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,

    /// Rebuild the entry, search and upload indexes before serving
    #[arg(long)]
    reconcile: bool,
}

impl Args {
    fn into_config(self) -> WikiConfig {
        let mut config = WikiConfig::new(self.repo, self.data);
        config.session_secret = self.session_secret;
        config.public = self.public;
        config.local_auth = !self.disable_local_auth;
        config.portal = self.portal_secret.map(|agent_secret| PortalConfig {
            agent_url: self.portal_url,
            agent_secret,
            email_domain: self.portal_domain,
            trusted_agents: self.trusted_agents,
            ..PortalConfig::default()
        });
        config.starter_template = self.starter;
        config.admin_email = self.admin_email;
        config.admin_password = self.admin_password;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let addr = args.addr;
    let reconcile = args.reconcile;
    let wiki = Arc::new(Wiki::open(args.into_config())?);

    if reconcile || wiki.entries.index().is_empty() {
        wiki.entries.reconcile().await?;
    }

    let app = api::router(wiki.clone());
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    wiki.search.flush().await;
    info!("shut down");
    Ok(())
}
