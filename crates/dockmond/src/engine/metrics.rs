//! Reduction of raw engine stats documents into metrics samples.
//!
//! Works on the JSON form of the stats response so the arithmetic is
//! independent of the engine client's model types.

use serde::Serialize;
use serde_json::Value;

use dockmon_core::{DomainError, DomainResult, Sample};

/// Network throughput summed over all interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NetIo {
    /// Received bytes.
    #[serde(rename = "in")]
    pub rx: u64,
    /// Transmitted bytes.
    #[serde(rename = "out")]
    pub tx: u64,
}

/// Memory usage with page cache excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub usage: u64,
    pub limit: u64,
    pub percent: f64,
}

/// One metrics sample as sent to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSample {
    /// Time the engine read the counters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    pub cpu_percent: f64,
    pub memory: MemoryUsage,
    pub net: NetIo,
}

impl MetricsSample {
    /// Reduces a stats document.
    ///
    /// Missing counters read as zero; only a non-object document is an error.
    pub fn from_stats(stats: &Value) -> DomainResult<Self> {
        if !stats.is_object() {
            return Err(DomainError::ParseError {
                field: "stats".to_string(),
                reason: "expected a JSON object".to_string(),
            });
        }

        Ok(Self {
            read: stats.get("read").and_then(Value::as_str).map(str::to_string),
            cpu_percent: cpu_percent(stats),
            memory: memory_usage(stats),
            net: net_io(stats),
        })
    }

    /// Converts the sample into a wire payload.
    pub fn into_sample(self) -> Sample {
        Sample::new(serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

fn u64_at(value: &Value, path: &[&str]) -> Option<u64> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_u64)
}

fn cpu_percent(stats: &Value) -> f64 {
    let total = u64_at(stats, &["cpu_stats", "cpu_usage", "total_usage"]).unwrap_or(0);
    let pre_total = u64_at(stats, &["precpu_stats", "cpu_usage", "total_usage"]).unwrap_or(0);
    let system = u64_at(stats, &["cpu_stats", "system_cpu_usage"]).unwrap_or(0);
    let pre_system = u64_at(stats, &["precpu_stats", "system_cpu_usage"]).unwrap_or(0);

    let online = u64_at(stats, &["cpu_stats", "online_cpus"])
        .filter(|n| *n > 0)
        .or_else(|| {
            stats
                .pointer("/cpu_stats/cpu_usage/percpu_usage")
                .and_then(Value::as_array)
                .map(|cpus| cpus.len() as u64)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1);

    let cpu_delta = total.saturating_sub(pre_total) as f64;
    let system_delta = system.saturating_sub(pre_system) as f64;

    if system_delta > 0.0 && cpu_delta > 0.0 {
        (cpu_delta / system_delta) * online as f64 * 100.0
    } else {
        0.0
    }
}

fn memory_usage(stats: &Value) -> MemoryUsage {
    let raw = u64_at(stats, &["memory_stats", "usage"]).unwrap_or(0);
    let limit = u64_at(stats, &["memory_stats", "limit"]).unwrap_or(0);

    // cgroup v2 reports inactive_file, v1 reports total_inactive_file
    let cache = u64_at(stats, &["memory_stats", "stats", "inactive_file"])
        .or_else(|| u64_at(stats, &["memory_stats", "stats", "total_inactive_file"]))
        .unwrap_or(0);
    let usage = raw.saturating_sub(cache);

    let percent = if limit > 0 {
        usage as f64 / limit as f64 * 100.0
    } else {
        0.0
    };

    MemoryUsage {
        usage,
        limit,
        percent,
    }
}

fn net_io(stats: &Value) -> NetIo {
    let Some(networks) = stats.get("networks").and_then(Value::as_object) else {
        return NetIo::default();
    };

    networks.values().fold(NetIo::default(), |acc, iface| NetIo {
        rx: acc.rx + u64_at(iface, &["rx_bytes"]).unwrap_or(0),
        tx: acc.tx + u64_at(iface, &["tx_bytes"]).unwrap_or(0),
    })
}
