//! Validated client quotas, built once from configuration and shared read-only.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use config::{ClientQuotaConfig, HorizonLimitConfig, HorizonSetConfig, RateLimitConfig};

use crate::{
    error::{ConfigError, Violation},
    key::{Horizons, Scope, builtin_horizon, builtin_horizon_names, contains_reserved},
};

/// Maximum number of calls within one fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HorizonLimit {
    /// Calls allowed within one window.
    pub max_calls: u64,
    /// Length of the window, in whole seconds.
    pub window: Duration,
}

/// The horizons of one scope, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeQuota {
    scope: Scope,
    horizons: Vec<(String, HorizonLimit)>,
}

impl ScopeQuota {
    /// The scope these horizons apply to.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// `(horizon name, limit)` pairs in declaration order.
    pub fn horizons(&self) -> impl Iterator<Item = (&str, &HorizonLimit)> {
        self.horizons.iter().map(|(name, limit)| (name.as_str(), limit))
    }
}

/// Quotas of a single client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientQuota {
    total: ScopeQuota,
    methods: HashMap<String, ScopeQuota>,
    paths: HashMap<String, ScopeQuota>,
}

impl ClientQuota {
    /// Scopes matching a request, in evaluation order: total, then method, then path.
    pub fn applicable<'a>(&'a self, method: &str, path: &str) -> impl Iterator<Item = &'a ScopeQuota> + use<'a> {
        std::iter::once(&self.total)
            .chain(self.methods.get(method))
            .chain(self.paths.get(path))
    }
}

/// Validated quotas of every configured client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quotas {
    clients: HashMap<String, ClientQuota>,
    horizons: Horizons,
}

impl Quotas {
    /// Validates the client quotas of the rate limit configuration.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        Self::load(config.clients.iter().map(|(name, quota)| (name.as_str(), quota)))
    }

    /// Validates raw client quotas. Every problem found is reported, not only the first one.
    pub fn load<'a, I>(clients: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a ClientQuotaConfig)>,
    {
        let mut validator = Validator::default();
        let mut quotas = HashMap::new();

        for (name, config) in clients {
            let quota = validator.client(name, config);

            if quotas.insert(name.to_string(), quota).is_some() {
                validator.violation(name, None, None, "client is configured more than once");
            }
        }

        if !validator.violations.is_empty() {
            return Err(ConfigError::new(validator.violations));
        }

        Ok(Self {
            clients: quotas,
            horizons: validator.horizons,
        })
    }

    /// Quotas of the named client, if it is configured.
    pub fn client(&self, name: &str) -> Option<&ClientQuota> {
        self.clients.get(name)
    }

    /// Window of a horizon name used in the configuration, or a built-in one.
    pub fn horizon_duration(&self, name: &str) -> Option<Duration> {
        self.horizons.duration(name)
    }

    /// Number of configured clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is configured.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[derive(Default)]
struct Validator {
    violations: Vec<Violation>,
    // horizon name -> (window, where it was first declared)
    first_declared: BTreeMap<String, (Duration, String)>,
    horizons: Horizons,
}

impl Validator {
    fn violation(&mut self, client: &str, scope: Option<&Scope>, horizon: Option<&str>, message: impl Into<String>) {
        self.violations.push(Violation {
            client: client.to_string(),
            scope: scope.cloned(),
            horizon: horizon.map(str::to_string),
            message: message.into(),
        });
    }

    fn client(&mut self, name: &str, config: &ClientQuotaConfig) -> ClientQuota {
        if name.is_empty() {
            self.violation(name, None, None, "client name must not be empty");
        } else if contains_reserved(name) {
            self.violation(name, None, None, "client name must not contain '|', '{' or '}'");
        }

        let total = self.scope(name, Scope::Total, &config.total);

        let mut methods = HashMap::with_capacity(config.methods.len());

        for (method, set) in &config.methods {
            let scope = Scope::Method(method.clone());

            if !is_method_token(method) {
                self.violation(name, Some(&scope), None, "method must be a valid HTTP method token");
            }

            methods.insert(method.clone(), self.scope(name, scope, set));
        }

        let mut paths = HashMap::with_capacity(config.paths.len());

        for (path, set) in &config.paths {
            let scope = Scope::Path(path.clone());

            if !path.starts_with('/') {
                self.violation(name, Some(&scope), None, "path must start with '/'");
            } else if path.contains(['?', '#']) || path.contains(char::is_whitespace) {
                self.violation(name, Some(&scope), None, "path must not contain a query, fragment or whitespace");
            } else if contains_reserved(path) {
                self.violation(name, Some(&scope), None, "path must not contain '|', '{' or '}'");
            }

            paths.insert(path.clone(), self.scope(name, scope, set));
        }

        ClientQuota { total, methods, paths }
    }

    fn scope(&mut self, client: &str, scope: Scope, set: &HorizonSetConfig) -> ScopeQuota {
        let mut seen = HashSet::with_capacity(set.len());
        let mut horizons = Vec::with_capacity(set.len());

        for (name, limit) in set.iter() {
            if !seen.insert(name) {
                self.violation(client, Some(&scope), Some(name), "horizon is declared more than once");
                continue;
            }

            if let Some(limit) = self.horizon(client, &scope, name, limit) {
                horizons.push((name.to_string(), limit));
            }
        }

        ScopeQuota { scope, horizons }
    }

    fn horizon(&mut self, client: &str, scope: &Scope, name: &str, config: &HorizonLimitConfig) -> Option<HorizonLimit> {
        let violations_before = self.violations.len();

        if name.is_empty() {
            self.violation(client, Some(scope), Some(name), "horizon name must not be empty");
        } else if contains_reserved(name) {
            self.violation(client, Some(scope), Some(name), "horizon name must not contain '|', '{' or '}'");
        }

        if config.limit == 0 {
            self.violation(client, Some(scope), Some(name), "limit must be greater than zero");
        }

        let window = match config.window.or_else(|| builtin_horizon(name)) {
            Some(window) if window.as_secs() == 0 || window.subsec_nanos() != 0 => {
                let message = format!("window must be a whole number of seconds, at least 1s, got {window:?}");
                self.violation(client, Some(scope), Some(name), message);

                return None;
            }
            Some(window) => window,
            None => {
                let builtins = builtin_horizon_names().collect::<Vec<_>>().join(", ");
                let message = format!("window is required unless the horizon is one of: {builtins}");
                self.violation(client, Some(scope), Some(name), message);

                return None;
            }
        };

        match self.first_declared.get(name).cloned() {
            Some((first, location)) if first != window => {
                let message = format!(
                    "window of {}s conflicts with {}s declared for the same horizon at {location}",
                    window.as_secs(),
                    first.as_secs()
                );

                self.violation(client, Some(scope), Some(name), message);
            }
            Some(_) => (),
            None => {
                let location = format!("client '{client}', scope '{scope}'");
                self.first_declared.insert(name.to_string(), (window, location));
                self.horizons.insert(name, window);
            }
        }

        (self.violations.len() == violations_before).then_some(HorizonLimit {
            max_calls: config.limit,
            window,
        })
    }
}

fn is_method_token(method: &str) -> bool {
    !method.is_empty()
        && method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`~".contains(&b))
}
