//! Startup configuration, read from environment variables.
//!
//! Every reader goes through a lookup closure so tests can feed a map
//! instead of mutating the process environment.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::AppError;

/// Offer ids excluded from scraping entirely.
pub const DEFAULT_DENIED_OFFER_IDS: &[i64] = &[
    11, 1077, 1460, 1579, 1978, 2616, 3824, 935, 55450290, 2640, 3888, 3138, 1030, 34,
];

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_SCRAPE_QUEUE: &str = "scrapper_queue";
pub const DEFAULT_EXTRACTION_QUEUE: &str = "products_queue";
pub const DEFAULT_DAILY_LIMIT: u32 = 1500;

/// Static set of offer ids that must never be scraped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenyList {
    ids: HashSet<i64>,
}

impl DenyList {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn contains(&self, offer_id: i64) -> bool {
        self.ids.contains(&offer_id)
    }

    /// Sorted ids, for query parameters and logs.
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scraper: ScraperConfig::default(),
            extraction: ExtractionConfig::default(),
            scrape_queue: QueueConfig::new(DEFAULT_SCRAPE_QUEUE)
                .with_batch_size(15)
                .with_batch_delay(Duration::from_secs(20)),
            extraction_queue: QueueConfig::new(DEFAULT_EXTRACTION_QUEUE)
                .with_daily_limit(DEFAULT_DAILY_LIMIT),
            credentials: Vec::new(),
            deny_list: DenyList::new(DEFAULT_DENIED_OFFER_IDS.iter().copied()),
            native_offer: None,
        }
    }
}

/// Browser navigation and retry settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperConfig {
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    pub page_timeout: Duration,
    /// Backoff before attempt `n + 1` is `retry_base_delay × n`.
    pub retry_base_delay: Duration,
    /// Bound on the in-page sanitize-and-serialize step.
    pub extraction_timeout: Duration,
    /// Pause after navigation before the page is read.
    pub settle_delay: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            connect_timeout: Duration::from_secs(30),
            page_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(2),
            extraction_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Extraction service settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionConfig {
    pub endpoint: String,
    pub model: String,
    pub max_attempts: u32,
    /// Fixed pause between attempts after a server fault.
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/extract".to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Per-queue consumption settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    /// Messages processed together; also the prefetch limit.
    pub batch_size: usize,
    /// Pause after every batch.
    pub batch_delay: Duration,
    /// Items allowed per credential per day. `None` disables quota handling.
    pub daily_limit: Option<u32>,
    /// Hard bound on one item's processing.
    pub item_timeout: Duration,
    /// Idle wait while the queue is empty or the quota is holding.
    pub poll_interval: Duration,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_size: 10,
            batch_delay: Duration::from_secs(5),
            daily_limit: None,
            item_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn with_daily_limit(mut self, limit: u32) -> Self {
        self.daily_limit = Some(limit);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.batch_size == 0 {
            return Err(AppError::ConfigError(format!(
                "{}: batch size must be at least 1",
                self.name
            )));
        }
        if let Some(limit) = self.daily_limit {
            if (limit as usize) < self.batch_size {
                return Err(AppError::ConfigError(format!(
                    "{}: daily limit {limit} is smaller than batch size {}",
                    self.name, self.batch_size
                )));
            }
        }
        Ok(())
    }
}

/// Everything the pipeline needs at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub scraper: ScraperConfig,
    pub extraction: ExtractionConfig,
    pub scrape_queue: QueueConfig,
    pub extraction_queue: QueueConfig,
    /// Rotating API credentials for the extraction service.
    pub credentials: Vec<String>,
    pub deny_list: DenyList,
    /// Offer whose pages are parsed from their own metadata instead of the
    /// extraction service; its availability is stored as delivered.
    pub native_offer: Option<i64>,
}

impl PipelineConfig {
    /// Read configuration from environment variables.
    ///
    /// Required: `SCRAPER_MAX_ATTEMPTS`, `BROWSER_TIMEOUT`, `PAGE_TIMEOUT`,
    /// `RETRY_BASE_DELAY`, `EXTRACTION_TIMEOUT`, `LLM_API_URL`,
    /// `LLM_MAX_ATTEMPTS`, `LLM_API_KEYS`. Durations are milliseconds.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = PipelineConfig::default();

        let scraper = ScraperConfig {
            max_attempts: env.required_positive("SCRAPER_MAX_ATTEMPTS")?,
            connect_timeout: env.required_millis("BROWSER_TIMEOUT")?,
            page_timeout: env.required_millis("PAGE_TIMEOUT")?,
            retry_base_delay: env.required_millis("RETRY_BASE_DELAY")?,
            extraction_timeout: env.required_millis("EXTRACTION_TIMEOUT")?,
            settle_delay: env.optional_millis("SCRAPER_SETTLE_DELAY", defaults.scraper.settle_delay)?,
        };

        let extraction = ExtractionConfig {
            endpoint: env.required("LLM_API_URL")?,
            model: env
                .optional("EXTRACTION_MODEL")
                .unwrap_or(defaults.extraction.model),
            max_attempts: env.required_positive("LLM_MAX_ATTEMPTS")?,
            retry_delay: env.optional_millis("LLM_RETRY_DELAY", defaults.extraction.retry_delay)?,
            request_timeout: env
                .optional_millis("LLM_REQUEST_TIMEOUT", defaults.extraction.request_timeout)?,
        };

        let credentials = split_list(&env.required("LLM_API_KEYS")?);
        if credentials.is_empty() {
            return Err(AppError::ConfigError(
                "LLM_API_KEYS must contain at least one key".into(),
            ));
        }

        let scrape_queue = env.queue("SCRAPE_QUEUE", defaults.scrape_queue)?;
        let extraction_queue = env.queue("EXTRACTION_QUEUE", defaults.extraction_queue)?;

        let deny_list = match env.optional("DENIED_OFFER_IDS") {
            None => defaults.deny_list,
            Some(raw) => {
                let ids = split_list(&raw)
                    .iter()
                    .map(|id| {
                        id.parse::<i64>().map_err(|_| {
                            AppError::ConfigError(format!(
                                "Invalid DENIED_OFFER_IDS entry '{id}': must be an integer"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                DenyList::new(ids)
            }
        };

        let native_offer = match env.optional("NATIVE_OFFER_ID") {
            None => None,
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid NATIVE_OFFER_ID '{raw}': must be an integer"
                ))
            })?),
        };

        let config = Self {
            scraper,
            extraction,
            scrape_queue,
            extraction_queue,
            credentials,
            deny_list,
            native_offer,
        };
        config.scrape_queue.validate()?;
        config.extraction_queue.validate()?;
        Ok(config)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, AppError> {
        self.optional(key)
            .ok_or_else(|| AppError::ConfigError(format!("{key} not set. Required at startup.")))
    }

    fn parse_u64(key: &str, raw: &str) -> Result<u64, AppError> {
        raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {key} '{raw}': must be a non-negative integer"
            ))
        })
    }

    /// Narrow a parsed value to the field's integer type.
    fn fit<T: TryFrom<u64>>(key: &str, value: u64) -> Result<T, AppError> {
        T::try_from(value)
            .map_err(|_| AppError::ConfigError(format!("{key} value {value} is out of range")))
    }

    fn required_positive(&self, key: &str) -> Result<u32, AppError> {
        let value = Self::parse_u64(key, &self.required(key)?)?;
        if value == 0 {
            return Err(AppError::ConfigError(format!("{key} must be at least 1")));
        }
        Self::fit(key, value)
    }

    fn required_millis(&self, key: &str) -> Result<Duration, AppError> {
        Ok(Duration::from_millis(Self::parse_u64(key, &self.required(key)?)?))
    }

    fn optional_millis(&self, key: &str, default: Duration) -> Result<Duration, AppError> {
        match self.optional(key) {
            None => Ok(default),
            Some(raw) => Ok(Duration::from_millis(Self::parse_u64(key, &raw)?)),
        }
    }

    fn queue(&self, prefix: &str, defaults: QueueConfig) -> Result<QueueConfig, AppError> {
        let name = self
            .optional(&format!("{prefix}_NAME"))
            .unwrap_or(defaults.name);
        let batch_key = format!("{prefix}_BATCH_SIZE");
        let batch_size = match self.optional(&batch_key) {
            None => defaults.batch_size,
            Some(raw) => Self::fit(&batch_key, Self::parse_u64(&batch_key, &raw)?)?,
        };
        let limit_key = format!("{prefix}_DAILY_LIMIT");
        let daily_limit = match self.optional(&limit_key) {
            None => defaults.daily_limit,
            Some(raw) if raw.trim().eq_ignore_ascii_case("none") => None,
            Some(raw) => Some(Self::fit(&limit_key, Self::parse_u64(&limit_key, &raw)?)?),
        };

        Ok(QueueConfig {
            name,
            batch_size,
            batch_delay: self.optional_millis(&format!("{prefix}_BATCH_DELAY"), defaults.batch_delay)?,
            daily_limit,
            item_timeout: self
                .optional_millis(&format!("{prefix}_ITEM_TIMEOUT"), defaults.item_timeout)?,
            poll_interval: self
                .optional_millis(&format!("{prefix}_POLL_INTERVAL"), defaults.poll_interval)?,
        })
    }
}
