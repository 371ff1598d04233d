//! Server configuration: TOML file + CLI overrides.

use serde::Deserialize;
use shellgate_core::{ShellError, ShellResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub shell: ShellSection,
    #[serde(default)]
    pub ssh: SshSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// `[shell]` section: PTY geometry and session lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    #[serde(default = "default_session_ttl_minutes")]
    pub session_ttl_minutes: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_pty_type")]
    pub pty_type: String,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
    #[serde(default = "default_pixel_width")]
    pub pixel_width: u32,
    #[serde(default = "default_pixel_height")]
    pub pixel_height: u32,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_prompt_wait_ms")]
    pub prompt_wait_ms: u64,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            session_ttl_minutes: default_session_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            pty_type: default_pty_type(),
            cols: default_cols(),
            rows: default_rows(),
            pixel_width: default_pixel_width(),
            pixel_height: default_pixel_height(),
            locale: default_locale(),
            prompt_wait_ms: default_prompt_wait_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

/// `[ssh]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SshSection {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            strict_host_key_checking: false,
        }
    }
}

/// `[store]` section. No `database_url` means the in-memory audit store.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub database_url: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8081
}
fn default_ws_port() -> u16 {
    8082
}
fn default_max_sessions() -> usize {
    100
}
fn default_session_ttl_minutes() -> u64 {
    60
}
fn default_sweep_interval_secs() -> u64 {
    600
}
fn default_pty_type() -> String {
    "xterm".to_string()
}
fn default_cols() -> u32 {
    100
}
fn default_rows() -> u32 {
    30
}
fn default_pixel_width() -> u32 {
    640
}
fn default_pixel_height() -> u32 {
    480
}
fn default_locale() -> String {
    "en_US.UTF-8".to_string()
}
fn default_prompt_wait_ms() -> u64 {
    500
}
fn default_close_timeout_ms() -> u64 {
    2000
}
fn default_connect_timeout_secs() -> u64 {
    30
}

/// PTY request parameters for a new shell channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtySpec {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub pixel_width: u32,
    pub pixel_height: u32,
    /// Environment sent before the shell starts (TERM, LANG, LC_ALL).
    pub env: Vec<(String, String)>,
}

impl Default for PtySpec {
    fn default() -> Self {
        ShellSection::default().pty_spec()
    }
}

impl ShellSection {
    pub fn pty_spec(&self) -> PtySpec {
        PtySpec {
            term: self.pty_type.clone(),
            cols: self.cols,
            rows: self.rows,
            pixel_width: self.pixel_width,
            pixel_height: self.pixel_height,
            env: vec![
                ("TERM".to_string(), self.pty_type.clone()),
                ("LANG".to_string(), self.locale.clone()),
                ("LC_ALL".to_string(), self.locale.clone()),
            ],
        }
    }
}

/// Values supplied on the command line; `None` keeps the file/default value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub http_port: Option<u16>,
    pub ws_port: Option<u16>,
    pub session_ttl_minutes: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
    pub database_url: Option<String>,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub max_sessions: usize,
    pub session_ttl: Duration,
    pub sweep_interval: Duration,
    pub pty: PtySpec,
    pub prompt_wait: Duration,
    pub close_timeout: Duration,
    pub connect_timeout: Duration,
    pub strict_host_key_checking: bool,
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::resolve(ConfigFile::default(), CliOverrides::default())
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, cli: CliOverrides) -> ShellResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    Self::parse_file(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let config = Self::resolve(file_config, cli);
        config.validate()?;
        Ok(config)
    }

    fn parse_file(content: &str) -> ShellResult<ConfigFile> {
        toml::from_str::<ConfigFile>(content)
            .map_err(|e| ShellError::Config(format!("config parse error: {e}")))
    }

    fn resolve(file: ConfigFile, cli: CliOverrides) -> Self {
        let ttl_minutes = cli
            .session_ttl_minutes
            .unwrap_or(file.shell.session_ttl_minutes);
        let sweep_secs = cli
            .sweep_interval_secs
            .unwrap_or(file.shell.sweep_interval_secs);

        Self {
            bind: file.server.bind.clone(),
            http_port: cli.http_port.unwrap_or(file.server.http_port),
            ws_port: cli.ws_port.unwrap_or(file.server.ws_port),
            max_sessions: file.server.max_sessions,
            session_ttl: Duration::from_secs(ttl_minutes.saturating_mul(60)),
            sweep_interval: Duration::from_secs(sweep_secs),
            pty: file.shell.pty_spec(),
            prompt_wait: Duration::from_millis(file.shell.prompt_wait_ms),
            close_timeout: Duration::from_millis(file.shell.close_timeout_ms),
            connect_timeout: Duration::from_secs(file.ssh.connect_timeout_secs),
            strict_host_key_checking: file.ssh.strict_host_key_checking,
            database_url: cli.database_url.or(file.store.database_url),
        }
    }

    fn validate(&self) -> ShellResult<()> {
        if self.http_port == self.ws_port {
            return Err(ShellError::Config(format!(
                "http_port and ws_port must differ (both {})",
                self.http_port
            )));
        }
        if self.sweep_interval.is_zero() {
            return Err(ShellError::Config("sweep_interval_secs must be > 0".into()));
        }
        if self.max_sessions == 0 {
            return Err(ShellError::Config("max_sessions must be > 0".into()));
        }
        Ok(())
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
