//! Helpers shared by the collector integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use proxmox_exporter_api_mock::{MockCluster, MockEndpoint};
use proxmox_exporter_cache::ResponseCache;
use proxmox_exporter_collector::{ClusterContext, Collector, CollectorConfig};
use proxmox_exporter_pool::{EndpointPool, PoolConfig};

/// 2024-06-01T12:00:00Z, the wall clock every test collector sees.
pub const NOW: i64 = 1_717_243_200;

pub const DAY: i64 = 86_400;

/// A collector wired to a mock cluster.
pub struct TestCluster {
    pub upstream: MockCluster,
    pub endpoints: Vec<MockEndpoint>,
    pub context: Arc<ClusterContext<MockEndpoint>>,
    pub collector: Collector<MockEndpoint>,
}

impl TestCluster {
    /// One endpoint, default configuration.
    pub fn new(upstream: &MockCluster) -> Self {
        Self::with_config(upstream, 1, CollectorConfig::default())
    }

    pub fn with_config(upstream: &MockCluster, endpoints: usize, config: CollectorConfig) -> Self {
        let endpoints: Vec<MockEndpoint> = (1..=endpoints)
            .map(|i| upstream.endpoint(&format!("pve{i}.example.com")))
            .collect();
        let pool = EndpointPool::new(endpoints.clone(), PoolConfig::default())
            .expect("pool should build");
        let context = Arc::new(ClusterContext::new(pool, ResponseCache::default()));
        let now = DateTime::<Utc>::from_timestamp(NOW, 0).expect("valid timestamp");
        let collector = Collector::new(Arc::clone(&context), config).with_clock(Arc::new(move || now));

        Self {
            upstream: upstream.clone(),
            endpoints,
            context,
            collector,
        }
    }

    /// Runs one scrape and parses its output.
    pub async fn scrape(&self) -> Exposition {
        let text = self.collector.collect().await.expect("scrape should succeed");
        Exposition::parse(&text)
    }
}

/// One sample line of the text exposition format.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub value: f64,
}

impl Sample {
    fn sort_key(&self) -> (String, Vec<(String, String)>) {
        let mut labels: Vec<_> = self
            .labels
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        labels.sort();
        (self.name.clone(), labels)
    }
}

/// Parsed output of one scrape.
#[derive(Clone, Debug, PartialEq)]
pub struct Exposition {
    pub samples: Vec<Sample>,
}

impl Exposition {
    /// Parses the sample lines of `text`, skipping comments.
    ///
    /// Only handles the layout the prometheus text encoder writes: no
    /// timestamps, and no whitespace between label pairs. Label values are
    /// unescaped for `\n`, `\\` and `\"` only.
    pub fn parse(text: &str) -> Self {
        let mut samples: Vec<Sample> = text
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| parse_sample(line).unwrap_or_else(|| panic!("bad sample line: {line}")))
            .collect();
        samples.sort_by_key(Sample::sort_key);
        Self { samples }
    }

    /// Samples of `name` whose labels include every pair in `labels`.
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Vec<&Sample> {
        self.samples
            .iter()
            .filter(|sample| sample.name == name)
            .filter(|sample| {
                labels
                    .iter()
                    .all(|(key, value)| sample.labels.get(*key).map(String::as_str) == Some(*value))
            })
            .collect()
    }

    /// Value of the single sample of `name` matching `labels`.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        match self.find(name, labels).as_slice() {
            [] => None,
            [sample] => Some(sample.value),
            many => panic!("{} samples of {name} match {labels:?}", many.len()),
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.find(name, &[]).len()
    }
}

fn parse_sample(line: &str) -> Option<Sample> {
    let (series, value) = line.rsplit_once(' ')?;
    let value = value.parse().ok()?;

    let (name, labels) = match series.split_once('{') {
        Some((name, rest)) => (name, parse_labels(rest.strip_suffix('}')?)?),
        None => (series, HashMap::new()),
    };

    Some(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

fn parse_labels(text: &str) -> Option<HashMap<String, String>> {
    let mut labels = HashMap::new();
    let mut chars = text.chars().peekable();

    while chars.peek().is_some() {
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if chars.next()? != '"' {
            return None;
        }

        let mut value = String::new();
        loop {
            match chars.next()? {
                '\\' => match chars.next()? {
                    'n' => value.push('\n'),
                    other => value.push(other),
                },
                '"' => break,
                other => value.push(other),
            }
        }
        labels.insert(key, value);

        if chars.peek() == Some(&',') {
            chars.next();
        }
    }

    Some(labels)
}
