//! Prometheus-style metric registry.
//!
//! Families are declared from the monitoring config; every permissible label
//! tuple is materialized at registration time so scrape output is stable and
//! zero-initialized before the first request.

mod reporter;

pub use reporter::{CurrentRequestsGuard, ModelMetricReporter};

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use crate::config::{MetricConfig, ADDITIONAL_METRIC_FAMILIES, DEFAULT_METRIC_FAMILIES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// Microsecond latency buckets shared by the duration histograms.
pub const DURATION_BUCKETS_US: &[f64] = &[
    100.0,
    1_000.0,
    10_000.0,
    100_000.0,
    1_000_000.0,
    10_000_000.0,
];

/// Renders a sorted `k="v",...` label body. Keys are sorted so the scrape
/// output is deterministic.
pub fn label_key(pairs: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = pairs.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);
    let mut out = String::new();
    for (index, (key, value)) in sorted.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        let _ = write!(out, "{key}=\"{value}\"");
    }
    out
}

#[derive(Debug)]
enum Series {
    Counter(u64),
    Gauge(i64),
    Histogram {
        counts: Vec<u64>,
        sum: f64,
        total: u64,
    },
}

/// One metric family: a name, a kind, and its materialized label tuples.
pub struct MetricFamily {
    name: &'static str,
    help: &'static str,
    kind: MetricKind,
    buckets: &'static [f64],
    series: Mutex<BTreeMap<String, Series>>,
}

impl MetricFamily {
    fn new(name: &'static str, help: &'static str, kind: MetricKind, buckets: &'static [f64]) -> Self {
        MetricFamily {
            name,
            help,
            kind,
            buckets,
            series: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn zero(&self) -> Series {
        match self.kind {
            MetricKind::Counter => Series::Counter(0),
            MetricKind::Gauge => Series::Gauge(0),
            MetricKind::Histogram => Series::Histogram {
                counts: vec![0; self.buckets.len()],
                sum: 0.0,
                total: 0,
            },
        }
    }

    /// Materializes a label tuple at zero so it appears in scrapes before any
    /// update.
    pub fn create(&self, key: &str) {
        let mut series = self.series.lock().expect("metric series lock poisoned");
        series.entry(key.to_string()).or_insert_with(|| self.zero());
    }

    pub fn increment(&self, key: &str, by: u64) {
        let mut series = self.series.lock().expect("metric series lock poisoned");
        let entry = series.entry(key.to_string()).or_insert_with(|| self.zero());
        if let Series::Counter(value) = entry {
            *value += by;
        }
    }

    pub fn set(&self, key: &str, value: i64) {
        let mut series = self.series.lock().expect("metric series lock poisoned");
        let entry = series.entry(key.to_string()).or_insert_with(|| self.zero());
        if let Series::Gauge(current) = entry {
            *current = value;
        }
    }

    pub fn add(&self, key: &str, delta: i64) {
        let mut series = self.series.lock().expect("metric series lock poisoned");
        let entry = series.entry(key.to_string()).or_insert_with(|| self.zero());
        if let Series::Gauge(current) = entry {
            *current += delta;
        }
    }

    pub fn observe(&self, key: &str, value: f64) {
        let mut series = self.series.lock().expect("metric series lock poisoned");
        let entry = series.entry(key.to_string()).or_insert_with(|| self.zero());
        if let Series::Histogram { counts, sum, total } = entry {
            for (index, bound) in self.buckets.iter().enumerate() {
                if value <= *bound {
                    counts[index] += 1;
                }
            }
            *sum += value;
            *total += 1;
        }
    }

    /// Current counter value for a tuple; test and debugging aid.
    pub fn counter_value(&self, key: &str) -> Option<u64> {
        let series = self.series.lock().expect("metric series lock poisoned");
        match series.get(key) {
            Some(Series::Counter(value)) => Some(*value),
            _ => None,
        }
    }

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} {}", self.name, self.kind.as_str());
        let series = self.series.lock().expect("metric series lock poisoned");
        for (key, value) in series.iter() {
            match value {
                Series::Counter(count) => {
                    let _ = writeln!(out, "{}{} {}", self.name, braced(key), count);
                }
                Series::Gauge(level) => {
                    let _ = writeln!(out, "{}{} {}", self.name, braced(key), level);
                }
                Series::Histogram { counts, sum, total } => {
                    for (index, bound) in self.buckets.iter().enumerate() {
                        let _ = writeln!(
                            out,
                            "{}_bucket{} {}",
                            self.name,
                            braced(&join_labels(key, &format!("le=\"{bound}\""))),
                            counts[index]
                        );
                    }
                    let _ = writeln!(
                        out,
                        "{}_bucket{} {}",
                        self.name,
                        braced(&join_labels(key, "le=\"+Inf\"")),
                        total
                    );
                    let _ = writeln!(out, "{}_count{} {}", self.name, braced(key), total);
                    let _ = writeln!(out, "{}_sum{} {}", self.name, braced(key), sum);
                }
            }
        }
    }
}

fn braced(key: &str) -> String {
    if key.is_empty() {
        String::new()
    } else {
        format!("{{{key}}}")
    }
}

fn join_labels(key: &str, extra: &str) -> String {
    if key.is_empty() {
        extra.to_string()
    } else {
        format!("{key},{extra}")
    }
}

/// The server-wide metric registry. An absent or disabled monitoring block
/// produces a registry whose `collect` returns an empty string and whose
/// family lookups return `None`, turning every reporter call into a no-op.
pub struct MetricRegistry {
    enabled_families: HashSet<&'static str>,
    families: Mutex<Vec<Arc<MetricFamily>>>,
}

impl MetricRegistry {
    pub fn new(config: &MetricConfig) -> Self {
        let mut enabled_families = HashSet::new();
        for family in DEFAULT_METRIC_FAMILIES.iter().chain(ADDITIONAL_METRIC_FAMILIES) {
            if config.is_family_enabled(family) {
                enabled_families.insert(*family);
            }
        }
        MetricRegistry {
            enabled_families,
            families: Mutex::new(Vec::new()),
        }
    }

    /// A registry with everything off.
    pub fn disabled() -> Self {
        MetricRegistry::new(&MetricConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        !self.enabled_families.is_empty()
    }

    /// Resolves (creating on first use) a family, or `None` when the family
    /// is not in the enabled list.
    pub fn family(
        &self,
        name: &'static str,
        help: &'static str,
        kind: MetricKind,
        buckets: &'static [f64],
    ) -> Option<Arc<MetricFamily>> {
        if !self.enabled_families.contains(name) {
            return None;
        }
        let mut families = self.families.lock().expect("metric registry lock poisoned");
        if let Some(existing) = families.iter().find(|family| family.name == name) {
            return Some(Arc::clone(existing));
        }
        let family = Arc::new(MetricFamily::new(name, help, kind, buckets));
        families.push(Arc::clone(&family));
        Some(family)
    }

    /// Prometheus text exposition of every registered family.
    pub fn collect(&self) -> String {
        let families = self.families.lock().expect("metric registry lock poisoned");
        let mut out = String::new();
        for family in families.iter() {
            family.render(&mut out);
        }
        out
    }
}
