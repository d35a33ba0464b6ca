use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug, Default)]
#[command(name = "khyati", about = "Games, videos and stories with optional accounts")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory (one directory per browser-style profile)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Base URL of the hosted identity service
    #[arg(long, env = "KHYATI_REMOTE_URL")]
    pub remote_url: Option<String>,

    /// Public (anon) key for the hosted identity service
    #[arg(long, env = "KHYATI_REMOTE_KEY")]
    pub remote_key: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub site: SiteConfig,
    pub auth: AuthConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

/// Hosted backend settings. Both `url` and `anon_key` must be non-empty for
/// the remote adapter to be tried.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    /// Hit the health endpoint at startup and fall back if it fails.
    pub probe: bool,
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SiteConfig {
    pub title: String,
    /// Show sign-in / sign-up links when nobody is signed in.
    pub show_auth_links: bool,
    /// Only this account sees the content-entry panel.
    pub admin_email: Option<String>,
    /// Directory with `games.json`, `videos.json`, `stories.json` for the
    /// demo backend.
    pub content_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            probe: false,
            timeout_secs: 10,
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Khyati".to_string(),
            show_auth_links: true,
            admin_email: None,
            content_dir: None,
        }
    }
}

impl SiteConfig {
    pub fn is_admin(&self, id: &str, email: &str) -> bool {
        match self.admin_email.as_deref().map(str::trim) {
            Some(admin) if !admin.is_empty() => {
                admin.eq_ignore_ascii_case(email) || admin == id
            }
            _ => false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }
        if let Some(ref url) = cli.remote_url {
            config.remote.url = url.clone();
        }
        if let Some(ref key) = cli.remote_key {
            config.remote.anon_key = key.clone();
        }

        // Resolve paths relative to data dir
        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("khyati.db"));
        }
        if config.site.content_dir.is_none() {
            config.site.content_dir = Some(data_dir.join("content"));
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".khyati")
        })
    }

    pub fn db_path(&self) -> &Path {
        self.database
            .path
            .as_deref()
            .unwrap_or_else(|| Path::new("khyati.db"))
    }
}
