//! Counter key derivation and horizon durations.

use std::{collections::BTreeMap, fmt, time::Duration};

/// Separates the fields of a rendered counter key.
pub const SEPARATOR: char = '|';

/// Characters that must not appear in client names, methods, paths or horizon names.
///
/// The braces delimit the client hash tag, so all keys of one client land in the same
/// Redis Cluster slot.
pub const RESERVED_CHARACTERS: [char; 3] = [SEPARATOR, '{', '}'];

/// Horizons that may be configured without an explicit window.
const BUILTIN_HORIZONS: &[(&str, u64)] = &[
    ("second", 1),
    ("min", 60),
    ("minute", 60),
    ("hour", 3_600),
    ("day", 86_400),
    ("week", 604_800),
    ("month", 2_628_000),
];

/// Window of a built-in horizon name.
pub fn builtin_horizon(name: &str) -> Option<Duration> {
    BUILTIN_HORIZONS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, seconds)| Duration::from_secs(*seconds))
}

/// Names of all built-in horizons.
pub fn builtin_horizon_names() -> impl Iterator<Item = &'static str> {
    BUILTIN_HORIZONS.iter().map(|(name, _)| *name)
}

/// Whether the value contains a character reserved by the key scheme.
pub fn contains_reserved(value: &str) -> bool {
    value.contains(RESERVED_CHARACTERS)
}

/// The dimension a quota applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Every request of the client.
    Total,
    /// Requests of the client with the given HTTP method.
    Method(String),
    /// Requests of the client to the given path.
    Path(String),
}

impl Scope {
    fn kind(&self) -> &'static str {
        match self {
            Scope::Total => "total",
            Scope::Method(_) => "method",
            Scope::Path(_) => "path",
        }
    }

    fn value(&self) -> &str {
        match self {
            Scope::Total => "",
            Scope::Method(method) => method,
            Scope::Path(path) => path,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Total => f.write_str("total"),
            Scope::Method(method) => write!(f, "method:{method}"),
            Scope::Path(path) => write!(f, "path:{path}"),
        }
    }
}

/// Identifies one counter: a client, a scope and a horizon.
///
/// Renders as `{client}|kind|value|horizon`. Every rendering has exactly four fields and
/// none of the names may contain [`RESERVED_CHARACTERS`], so two different keys never
/// render to the same string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterKey<'a> {
    client: &'a str,
    scope: &'a Scope,
    horizon: &'a str,
}

impl<'a> CounterKey<'a> {
    /// Key for the given client, scope and horizon.
    pub fn new(client: &'a str, scope: &'a Scope, horizon: &'a str) -> Self {
        Self { client, scope, horizon }
    }

    /// The store key of this counter.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CounterKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{client}}}{SEPARATOR}{kind}{SEPARATOR}{value}{SEPARATOR}{horizon}",
            client = self.client,
            kind = self.scope.kind(),
            value = self.scope.value(),
            horizon = self.horizon,
        )
    }
}

/// Resolved windows of every horizon name used in the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Horizons {
    windows: BTreeMap<String, Duration>,
}

impl Horizons {
    pub(crate) fn insert(&mut self, name: &str, window: Duration) {
        self.windows.insert(name.to_string(), window);
    }

    /// The window of a horizon: the configured one, or the built-in default.
    pub fn duration(&self, name: &str) -> Option<Duration> {
        self.windows.get(name).copied().or_else(|| builtin_horizon(name))
    }
}
