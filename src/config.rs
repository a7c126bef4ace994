use crate::errors::Locale;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use secrecy::SecretString;
use std::{env, fmt, path::PathBuf, str::FromStr};
use url::Url;

/// What to do when a photo cannot be decoded or uploaded during create/update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ImageFailurePolicy {
    /// Persist the record without the new image.
    #[default]
    Degrade,
    /// Fail the whole operation and write nothing.
    Abort,
}

impl FromStr for ImageFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "degrade" => Ok(Self::Degrade),
            "abort" => Ok(Self::Abort),
            other => bail!("unknown image failure policy `{}`", other),
        }
    }
}

/// Connection details for the hosted backend.
#[derive(Clone)]
pub struct RemoteConfig {
    pub base_url: Url,
    pub anon_key: SecretString,
    pub storage_bucket: String,
    pub items_table: String,
    pub profiles_table: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field("storage_bucket", &self.storage_bucket)
            .field("items_table", &self.items_table)
            .field("profiles_table", &self.profiles_table)
            .finish()
    }
}

impl RemoteConfig {
    /// Join a backend path (e.g. `rest/v1/luxury_items`) onto the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
    }
}

/// Where records, accounts and images live.
#[derive(Clone, Debug)]
pub enum Backend {
    Local,
    Remote(RemoteConfig),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments. Built once in `main`
/// and shared by reference afterwards.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub backend: Backend,
    pub image_failure_policy: ImageFailurePolicy,
    pub jpeg_quality: u8,
    pub locale: Locale,
    pub session_ttl_days: i64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Personal luxury collection catalog service")]
pub struct Args {
    /// Host to bind to (overrides LUXURY_CATALOG_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides LUXURY_CATALOG_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for the local database and stored images (overrides LUXURY_CATALOG_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Database URL (overrides LUXURY_CATALOG_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Hosted backend URL (overrides SUPABASE_URL)
    #[arg(long)]
    pub supabase_url: Option<String>,

    /// Hosted backend anonymous key (overrides SUPABASE_ANON_KEY)
    #[arg(long)]
    pub supabase_anon_key: Option<String>,

    /// Behaviour when a photo cannot be decoded or uploaded
    #[arg(long, value_enum)]
    pub image_failure_policy: Option<ImageFailurePolicy>,

    /// JPEG quality used when normalizing photos (1-100)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Locale for user-facing messages (en, zh-cn)
    #[arg(long)]
    pub locale: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok().filter(|v| !v.is_empty()))?;
        Ok((cfg, migrate))
    }

    /// Merge CLI arguments over values looked up through `var`.
    pub fn resolve(args: Args, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match var("LUXURY_CATALOG_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing LUXURY_CATALOG_PORT value `{}`", value))?,
            None => 3000,
        };
        let data_dir = args
            .data_dir
            .or_else(|| var("LUXURY_CATALOG_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("./data"));
        let database_url = args
            .database_url
            .or_else(|| var("LUXURY_CATALOG_DATABASE_URL"))
            .unwrap_or_else(|| format!("sqlite://{}/catalog.db", data_dir.display()));

        let supabase_url = args.supabase_url.or_else(|| var("SUPABASE_URL"));
        let anon_key = args.supabase_anon_key.or_else(|| var("SUPABASE_ANON_KEY"));
        let backend = match (supabase_url, anon_key) {
            (Some(url), Some(key)) => Backend::Remote(RemoteConfig {
                base_url: Url::parse(&url).with_context(|| format!("parsing SUPABASE_URL `{}`", url))?,
                anon_key: SecretString::from(key),
                storage_bucket: var("LUXURY_CATALOG_STORAGE_BUCKET")
                    .unwrap_or_else(|| "item-images".into()),
                items_table: var("LUXURY_CATALOG_ITEMS_TABLE")
                    .unwrap_or_else(|| "luxury_items".into()),
                profiles_table: var("LUXURY_CATALOG_PROFILES_TABLE")
                    .unwrap_or_else(|| "users".into()),
            }),
            (None, None) => Backend::Local,
            (Some(_), None) => bail!("SUPABASE_URL is set but SUPABASE_ANON_KEY is missing"),
            (None, Some(_)) => bail!("SUPABASE_ANON_KEY is set but SUPABASE_URL is missing"),
        };

        let image_failure_policy = match args.image_failure_policy {
            Some(policy) => policy,
            None => var("LUXURY_CATALOG_IMAGE_FAILURE_POLICY")
                .map(|v| v.parse::<ImageFailurePolicy>())
                .transpose()?
                .unwrap_or_default(),
        };

        let jpeg_quality = match args.jpeg_quality {
            Some(q) => q,
            None => match var("LUXURY_CATALOG_JPEG_QUALITY") {
                Some(value) => value
                    .parse::<u8>()
                    .with_context(|| format!("parsing LUXURY_CATALOG_JPEG_QUALITY `{}`", value))?,
                None => 90,
            },
        };
        if !(1..=100).contains(&jpeg_quality) {
            bail!("jpeg quality must be between 1 and 100, got {}", jpeg_quality);
        }

        let locale = match args.locale.or_else(|| var("LUXURY_CATALOG_LOCALE")) {
            Some(value) => value.parse::<Locale>().map_err(anyhow::Error::msg)?,
            None => Locale::default(),
        };

        let session_ttl_days = match var("LUXURY_CATALOG_SESSION_TTL_DAYS") {
            Some(value) => value
                .parse::<i64>()
                .with_context(|| format!("parsing LUXURY_CATALOG_SESSION_TTL_DAYS `{}`", value))?,
            None => 30,
        };

        Ok(Self {
            host: args
                .host
                .or_else(|| var("LUXURY_CATALOG_HOST"))
                .unwrap_or_else(|| "127.0.0.1".into()),
            port: args.port.unwrap_or(port),
            data_dir,
            database_url,
            backend,
            image_failure_policy,
            jpeg_quality,
            locale,
            session_ttl_days,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Root directory for images stored by the local uploader.
    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }
}
