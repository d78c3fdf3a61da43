//! Mock 采集后端与指标采样器
//!
//! 用于无相机硬件环境的测试与演示。

use std::f64::consts::TAU;
use std::time::Duration;

use bytes::Bytes;
use contracts::{CaptureBackend, ContractError, MetricSampler, MetricSet, PixelFormat, RawFrame};
use tokio::time::Instant;
use tracing::trace;

/// Mock 采集后端配置
#[derive(Debug, Clone)]
pub struct MockCaptureConfig {
    /// 图像宽度
    pub width: u32,

    /// 图像高度
    pub height: u32,

    /// 出帧频率 (fps)
    pub fps: f64,

    /// 像素格式
    pub format: PixelFormat,

    /// 每 N 次轮询返回一次错误（None 表示从不失败）
    pub fail_every: Option<u64>,
}

impl Default for MockCaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            format: PixelFormat::Bgr8,
            fail_every: None,
        }
    }
}

impl MockCaptureConfig {
    /// 4x2 的小帧，便于测试
    pub fn tiny() -> Self {
        Self {
            width: 4,
            height: 2,
            ..Default::default()
        }
    }
}

/// Mock 采集后端
///
/// 按固定节拍生成渐变灰度帧；轮询早于节拍时返回 `Ok(None)`。
pub struct MockCaptureBackend {
    config: MockCaptureConfig,
    period: Duration,
    started: Instant,
    next_due: Instant,
    sequence: u64,
    polls: u64,
}

impl MockCaptureBackend {
    /// 创建新的 Mock 采集后端
    pub fn new(config: MockCaptureConfig) -> Self {
        let period = if config.fps > 0.0 {
            Duration::from_secs_f64(1.0 / config.fps)
        } else {
            Duration::from_secs(1)
        };
        let started = Instant::now();
        Self {
            config,
            period,
            started,
            next_due: started + period,
            sequence: 0,
            polls: 0,
        }
    }

    fn frame_bytes(&self) -> usize {
        let bpp = self.config.format.bytes_per_pixel().unwrap_or(1);
        self.config.width as usize * self.config.height as usize * bpp
    }
}

impl CaptureBackend for MockCaptureBackend {
    fn poll_frame(&mut self) -> Result<Option<RawFrame>, ContractError> {
        self.polls += 1;
        if self
            .config
            .fail_every
            .is_some_and(|n| n > 0 && self.polls % n == 0)
        {
            return Err(ContractError::transient("mock capture glitch"));
        }

        let now = Instant::now();
        if now < self.next_due {
            return Ok(None);
        }
        // 保持节拍；落后超过一个周期时重新对齐，避免突发补帧
        self.next_due += self.period;
        if self.next_due <= now {
            self.next_due = now + self.period;
        }

        self.sequence += 1;
        let shade = (self.sequence % 256) as u8;
        trace!(sequence = self.sequence, "mock frame");

        Ok(Some(RawFrame {
            sequence: self.sequence,
            timestamp: now.duration_since(self.started).as_secs_f64(),
            width: self.config.width,
            height: self.config.height,
            format: self.config.format,
            data: Bytes::from(vec![shade; self.frame_bytes()]),
        }))
    }

    fn rate_hint(&self) -> f64 {
        self.config.fps
    }
}

/// Mock 系统指标采样器
///
/// 生成平滑变化的 CPU/内存/GPU/温度/电压数值。
#[derive(Debug, Default)]
pub struct MockMetricSampler {
    tick: u64,
    fail_every: Option<u64>,
}

impl MockMetricSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每 N 次采样失败一次
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }
}

impl MetricSampler for MockMetricSampler {
    fn poll_metrics(&mut self) -> Result<Option<MetricSet>, ContractError> {
        self.tick += 1;
        if self.fail_every.is_some_and(|n| n > 0 && self.tick % n == 0) {
            return Err(ContractError::transient("mock sampler unavailable"));
        }

        let phase = (self.tick as f64 / 50.0) * TAU;
        let mut metrics = MetricSet::new();
        metrics.insert("cpu_usage".into(), 35.0 + 15.0 * phase.sin());
        metrics.insert("memory_usage".into(), 48.0 + 4.0 * phase.cos());
        metrics.insert("gpu_usage".into(), 60.0 + 20.0 * (phase * 0.5).sin());
        metrics.insert("temperature".into(), 52.0 + 3.0 * phase.sin());
        metrics.insert("battery_voltage".into(), 16.8 - (self.tick as f64 * 0.001).min(2.0));
        Ok(Some(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_on_schedule_only() {
        let mut backend = MockCaptureBackend::new(MockCaptureConfig {
            fps: 10.0,
            ..MockCaptureConfig::tiny()
        });
        assert!(backend.poll_frame().unwrap().is_none());

        tokio::time::advance(Duration::from_millis(100)).await;
        let frame = backend.poll_frame().unwrap().expect("due");
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.data.len(), 4 * 2 * 3);
        assert!(backend.poll_frame().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stall_does_not_burst() {
        let mut backend = MockCaptureBackend::new(MockCaptureConfig {
            fps: 10.0,
            ..MockCaptureConfig::tiny()
        });
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(backend.poll_frame().unwrap().is_some());
        assert!(backend.poll_frame().unwrap().is_none());
    }

    #[test]
    fn sampler_failure_is_periodic() {
        let mut sampler = MockMetricSampler::new().fail_every(3);
        assert!(sampler.poll_metrics().is_ok());
        assert!(sampler.poll_metrics().is_ok());
        assert!(sampler.poll_metrics().is_err());
        let metrics = sampler.poll_metrics().unwrap().unwrap();
        assert!(metrics.contains_key("cpu_usage"));
    }
}
