//! 分发与链路指标
//!
//! 通过 `metrics` facade 记录 `skyrelay_*` 指标，并提供进程内的延迟统计。

use contracts::{LinkState, SinkHealth};
use metrics::{counter, gauge, histogram};

/// 记录一次 Dispatcher 节拍
///
/// `offered` 为本次节拍投递到各 sink 邮箱的条目总数。
pub fn record_tick(latency_ms: f64, offered: usize) {
    counter!("skyrelay_dispatch_ticks_total").increment(1);
    histogram!("skyrelay_dispatch_tick_ms").record(latency_ms);
    if offered > 0 {
        counter!("skyrelay_dispatch_items_offered_total").increment(offered as u64);
    }
}

/// 邮箱投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Enqueued,
    /// 邮箱已满，最旧条目被丢弃
    DisplacedOldest,
    /// 接收端已关闭
    Closed,
}

impl OfferOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::DisplacedOldest => "displaced",
            Self::Closed => "closed",
        }
    }
}

/// 记录一次邮箱投递
pub fn record_sink_offer(sink: &str, outcome: OfferOutcome) {
    counter!(
        "skyrelay_sink_offers_total",
        "sink" => sink.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// 记录 sink 写入结果
pub fn record_sink_delivery(sink: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "skyrelay_sink_writes_total",
        "sink" => sink.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录 sink 健康状态 (0 = connected, 1 = degraded, 2 = disconnected)
pub fn record_sink_health(sink: &str, health: SinkHealth) {
    gauge!("skyrelay_sink_health", "sink" => sink.to_string()).set(f64::from(health.code()));
}

/// 记录发射机链路状态切换
pub fn record_link_state(state: LinkState) {
    counter!("skyrelay_link_state_changes_total", "state" => state.as_str()).increment(1);
}

/// 记录采集/遥测源的平滑速率
pub fn record_source_rate(source: &'static str, rate_hz: f64) {
    gauge!("skyrelay_source_rate_hz", "source" => source).set(rate_hz);
}

/// Tick 延迟摘要（毫秒）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.count {
            0 => f.write_str("no samples"),
            n => write!(
                f,
                "mean {:.3} (min {:.3}, max {:.3}, sd {:.3}, n={n})",
                self.mean, self.min, self.max, self.std_dev
            ),
        }
    }
}

/// Welford 在线均值/方差，常数内存
#[derive(Debug, Clone)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
    lo: f64,
    hi: f64,
}

impl Default for RunningStats {
    fn default() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            lo: f64::INFINITY,
            hi: f64::NEG_INFINITY,
        }
    }
}

impl RunningStats {
    pub fn push(&mut self, sample: f64) {
        self.n += 1;
        self.lo = self.lo.min(sample);
        self.hi = self.hi.max(sample);
        let before = sample - self.mean;
        self.mean += before / self.n as f64;
        self.m2 += before * (sample - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn summary(&self) -> StatsSummary {
        if self.n == 0 {
            return StatsSummary::default();
        }
        let variance = if self.n > 1 { self.m2 / (self.n - 1) as f64 } else { 0.0 };
        StatsSummary {
            count: self.n,
            min: self.lo,
            max: self.hi,
            mean: self.mean,
            std_dev: variance.sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_variance_of_small_series() {
        let mut stats = RunningStats::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(v);
        }

        let summary = stats.summary();
        assert_eq!(summary.count, 8);
        assert!((summary.mean - 5.0).abs() < 1e-10);
        assert_eq!((summary.min, summary.max), (2.0, 9.0));
        assert!((summary.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-10);
    }

    #[test]
    fn empty_and_single_sample() {
        let mut stats = RunningStats::default();
        assert_eq!(stats.summary(), StatsSummary::default());
        assert_eq!(stats.summary().to_string(), "no samples");

        stats.push(1.5);
        let summary = stats.summary();
        assert_eq!(summary.std_dev, 0.0);
        assert_eq!(summary.to_string(), "mean 1.500 (min 1.500, max 1.500, sd 0.000, n=1)");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_tick(1.2, 3);
        record_sink_offer("log", OfferOutcome::DisplacedOldest);
        record_sink_delivery("log", false);
        record_sink_health("log", SinkHealth::Degraded);
        record_link_state(LinkState::Recovering);
        record_source_rate("capture", 29.7);
    }
}
