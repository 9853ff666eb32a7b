use anyhow::{Context, Result};
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "DROPHOST_";

/// Runtime configuration, merged from `DROPHOST_*` variables and CLI flags.
/// Flags win over the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub content_dir: PathBuf,
    pub database_url: String,
    pub keys_file: PathBuf,
    pub domains_file: PathBuf,
    pub site_name: String,
    pub size_limit_bytes: usize,
    pub upload_ratelimit: Duration,
    pub shorten_ratelimit: Duration,
    pub key_length_limit: usize,
    /// Honour `X-Forwarded-Proto` when deriving URLs.
    pub trust_proxy: bool,
    pub hash_memory_kib: u32,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Self-hosted file drop and link shortener")]
pub struct Args {
    /// Host to bind to (overrides DROPHOST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DROPHOST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded bytes live (overrides DROPHOST_CONTENT_DIR)
    #[arg(long)]
    pub content_dir: Option<PathBuf>,

    /// Database URL (overrides DROPHOST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Credential list, one per line (overrides DROPHOST_KEYS_FILE)
    #[arg(long)]
    pub keys_file: Option<PathBuf>,

    /// Served domain list (overrides DROPHOST_DOMAINS_FILE)
    #[arg(long)]
    pub domains_file: Option<PathBuf>,

    /// Maximum upload size in bytes (overrides DROPHOST_SIZE_LIMIT)
    #[arg(long)]
    pub size_limit: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the migrate
    /// flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let cfg = Self::merge(args.host, args.port, args.content_dir, args.database_url)?;
        let cfg = Self {
            keys_file: args.keys_file.unwrap_or(cfg.keys_file),
            domains_file: args.domains_file.unwrap_or(cfg.domains_file),
            size_limit_bytes: args.size_limit.unwrap_or(cfg.size_limit_bytes),
            ..cfg
        };
        Ok((cfg, args.migrate))
    }

    fn merge(
        host: Option<String>,
        port: Option<u16>,
        content_dir: Option<PathBuf>,
        database_url: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            host: host.unwrap_or_else(|| env_string("HOST", "0.0.0.0")),
            port: match port {
                Some(port) => port,
                None => env_parsed("PORT", 3000)?,
            },
            content_dir: content_dir
                .unwrap_or_else(|| env_string("CONTENT_DIR", "./data/images").into()),
            database_url: database_url.unwrap_or_else(|| {
                env_string("DATABASE_URL", "sqlite://./data/meta/drophost.db")
            }),
            keys_file: env_string("KEYS_FILE", "keys.txt").into(),
            domains_file: env_string("DOMAINS_FILE", "domains.txt").into(),
            site_name: env_string("SITE_NAME", "drophost"),
            size_limit_bytes: env_parsed("SIZE_LIMIT", 100 * 1000 * 1000)?,
            upload_ratelimit: Duration::from_millis(env_parsed("UPLOAD_RATELIMIT_MS", 1000)?),
            shorten_ratelimit: Duration::from_millis(env_parsed("SHORTEN_RATELIMIT_MS", 2500)?),
            key_length_limit: env_parsed("KEY_LENGTH_LIMIT", 64)?,
            trust_proxy: env_parsed("TRUST_PROXY", false)?,
            hash_memory_kib: env_parsed("HASH_MEMORY_KIB", argon2::Params::DEFAULT_M_COST)?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(format!("{ENV_PREFIX}{key}")).unwrap_or_else(|_| default.into())
}

fn env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let name = format!("{ENV_PREFIX}{key}");
    match env::var(&name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {name} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {name}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_win_over_defaults() {
        let cfg = AppConfig::merge(
            Some("127.0.0.1".into()),
            Some(8080),
            Some("/tmp/content".into()),
            Some("sqlite::memory:".into()),
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.content_dir, PathBuf::from("/tmp/content"));
        assert_eq!(cfg.database_url, "sqlite::memory:");
    }

    #[test]
    fn missing_variable_falls_back() {
        let value: u64 = env_parsed("SURELY_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
