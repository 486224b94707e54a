//! Origin selection.
//!
//! A [`BaseManager`] owns the list of origins a presentation may be fetched
//! from. Requests are spread over online origins by weighted round robin; an
//! origin that fails too often inside a rolling window is taken offline for a
//! while and re-enabled automatically on the next check after that.

use std::{collections::VecDeque, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use tokio::time::Instant;
use url::Url;

use crate::NagareResult;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UriTransform {
    /// Replace the host (and port, if given as `host:port`).
    Host { host: String },
    Scheme { scheme: String },
    /// Replace a leading path segment.
    PathPrefix { from: String, to: String },
    /// Plain substring replacement over the whole URL.
    Replace { from: String, to: String },
}

impl UriTransform {
    pub fn apply(&self, mut url: Url) -> NagareResult<Url> {
        match self {
            Self::Host { host } => match host.rsplit_once(':') {
                Some((name, port)) if port.parse::<u16>().is_ok() => {
                    url.set_host(Some(name))?;
                    if url.set_port(port.parse().ok()).is_err() {
                        tracing::warn!(%url, port, "Can not set port on url");
                    }
                }
                _ => url.set_host(Some(host))?,
            },
            Self::Scheme { scheme } => {
                if url.set_scheme(scheme).is_err() {
                    tracing::warn!(%url, %scheme, "Can not change url scheme");
                }
            }
            Self::PathPrefix { from, to } => {
                if let Some(rest) = url.path().strip_prefix(from.as_str()) {
                    let path = format!("{to}{rest}");
                    url.set_path(&path);
                }
            }
            Self::Replace { from, to } => {
                url = Url::parse(&url.as_str().replace(from.as_str(), to))?;
            }
        }
        Ok(url)
    }
}

fn default_weight() -> u32 {
    1
}

/// How one origin is declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub transforms: Vec<UriTransform>,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            transforms: Vec::new(),
            weight: default_weight(),
        }
    }
}

impl BaseConfig {
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            transforms: vec![UriTransform::Host { host: host.into() }],
            weight: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaseOptions {
    /// Failures older than this no longer count.
    pub window_secs: f64,
    /// A base goes offline once it has more failures than this inside the window.
    pub max_failed: usize,
    pub offline_secs: f64,
    /// Reshuffle the base list this often. Disabled when unset.
    pub shuffle_after_secs: Option<f64>,
}

impl Default for BaseOptions {
    fn default() -> Self {
        Self {
            window_secs: 30.0,
            max_failed: 2,
            offline_secs: 30.0,
            shuffle_after_secs: None,
        }
    }
}

impl BaseOptions {
    fn window(&self) -> Duration {
        Duration::from_secs_f64(self.window_secs.max(0.0))
    }

    fn offline(&self) -> Duration {
        Duration::from_secs_f64(self.offline_secs.max(0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseId(u64);

impl BaseId {
    /// Used before any manifest has been loaded. Never fails over.
    pub const IDENTITY: BaseId = BaseId(0);
}

impl std::fmt::Display for BaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Base {
    id: BaseId,
    transforms: Vec<UriTransform>,
    weight: u32,
    served: u32,
    failures: VecDeque<Instant>,
    reenable_at: Option<Instant>,
}

impl Base {
    fn new(id: BaseId, config: BaseConfig) -> Self {
        Self {
            id,
            transforms: config.transforms,
            weight: config.weight.max(1),
            served: 0,
            failures: VecDeque::new(),
            reenable_at: None,
        }
    }

    pub fn id(&self) -> BaseId {
        self.id
    }

    pub fn apply(&self, url: &Url) -> NagareResult<Url> {
        self.transforms
            .iter()
            .try_fold(url.clone(), |url, transform| transform.apply(url))
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .failures
            .front()
            .is_some_and(|failed_at| now.saturating_duration_since(*failed_at) > window)
        {
            self.failures.pop_front();
        }
    }

    fn failed(&mut self, now: Instant, options: &BaseOptions) {
        self.failures.push_back(now);
        self.prune(now, options.window());
        if self.reenable_at.is_none() && self.failures.len() > options.max_failed {
            self.reenable_at = Some(now + options.offline());
            tracing::warn!(
                base = %self.id,
                failures = self.failures.len(),
                offline_secs = options.offline_secs,
                "Base taken offline"
            );
        }
    }

    /// Whether the base can serve requests. A base whose offline period has
    /// elapsed is re-enabled with a clean failure history.
    pub fn is_online(&mut self, now: Instant) -> bool {
        match self.reenable_at {
            Some(reenable_at) if now >= reenable_at => {
                self.failures.clear();
                self.reenable_at = None;
                tracing::info!(base = %self.id, "Base re-enabled");
                true
            }
            Some(_) => false,
            None => true,
        }
    }
}

pub struct BaseManager {
    bases: Vec<Base>,
    identity: Base,
    next_index: usize,
    next_id: u64,
    manifest_loaded: bool,
    last_shuffle: Instant,
    options: BaseOptions,
    rng: StdRng,
}

impl BaseManager {
    pub fn new(configs: Vec<BaseConfig>, options: BaseOptions) -> Self {
        Self::with_rng(configs, options, StdRng::from_entropy())
    }

    pub fn with_rng(configs: Vec<BaseConfig>, options: BaseOptions, rng: StdRng) -> Self {
        let mut manager = Self {
            bases: Vec::with_capacity(configs.len()),
            identity: Base::new(BaseId::IDENTITY, BaseConfig::default()),
            next_index: 0,
            next_id: 1,
            manifest_loaded: false,
            last_shuffle: Instant::now(),
            options,
            rng,
        };
        for config in configs {
            manager.push(config);
        }
        manager
    }

    fn push(&mut self, config: BaseConfig) -> BaseId {
        let id = BaseId(self.next_id);
        self.next_id += 1;
        self.bases.push(Base::new(id, config));
        id
    }

    pub fn set_manifest_loaded(&mut self) {
        self.manifest_loaded = true;
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = BaseId> + '_ {
        self.bases.iter().map(Base::id)
    }

    pub fn get(&self, id: BaseId) -> Option<&Base> {
        if id == BaseId::IDENTITY {
            return Some(&self.identity);
        }
        self.bases.iter().find(|b| b.id == id)
    }

    pub fn is_online(&mut self, id: BaseId, now: Instant) -> bool {
        self.bases
            .iter_mut()
            .find(|b| b.id == id)
            .map_or(true, |b| b.is_online(now))
    }

    /// Pick the base for the next attempt, skipping offline bases and those
    /// already tried by the caller.
    pub fn next_base(&mut self, attempted: &[BaseId], now: Instant) -> Option<BaseId> {
        if !self.manifest_loaded {
            return Some(BaseId::IDENTITY);
        }
        if self.bases.is_empty() {
            let id = self.push(BaseConfig::default());
            tracing::debug!(base = %id, "Created pass-through base");
        }
        if self.bases.len() == 1 {
            return Some(self.bases[0].id);
        }

        let len = self.bases.len();
        let start = self.next_index % len;
        for offset in 0..len {
            let index = (start + offset) % len;
            let base = &mut self.bases[index];
            if attempted.contains(&base.id) || !base.is_online(now) {
                continue;
            }

            base.served += 1;
            if base.served >= base.weight {
                base.served = 0;
                self.next_index = index + 1;
            } else {
                self.next_index = index;
            }
            return Some(base.id);
        }
        None
    }

    /// Record a failed request against a base.
    pub fn failed(&mut self, id: BaseId, now: Instant) {
        if let Some(base) = self.bases.iter_mut().find(|b| b.id == id) {
            base.failed(now, &self.options);
        }
    }

    pub fn maybe_shuffle(&mut self, now: Instant) {
        let Some(shuffle_after) = self.options.shuffle_after_secs else {
            return;
        };
        if now.saturating_duration_since(self.last_shuffle).as_secs_f64() >= shuffle_after {
            self.last_shuffle = now;
            self.shuffle();
        }
    }

    /// Fisher-Yates down to the first pair, which is only swapped on a coin
    /// flip. Two-base lists therefore keep their order half of the time.
    pub fn shuffle(&mut self) {
        let len = self.bases.len();
        if len < 2 {
            return;
        }
        for i in (2..len).rev() {
            let j = self.rng.gen_range(0..=i);
            self.bases.swap(i, j);
        }
        if self.rng.gen_bool(0.5) {
            self.bases.swap(0, 1);
        }
        self.next_index = 0;
        for base in &mut self.bases {
            base.served = 0;
        }
        tracing::debug!(order = ?self.ids().collect::<Vec<_>>(), "Bases shuffled");
    }
}
