//! 运行指标收集模块
//!
//! 帧耗时、实体变更、数据存储操作与连接池状态的指标记录，
//! 以及进程内的帧耗时聚合统计。

use contracts::ChangeSet;
use metrics::{counter, gauge, histogram};

/// 记录一帧完成
///
/// 每次仿真线程完成 step + 命令队列执行后调用。
pub fn record_frame(instance_id: &str, frame_time_ms: f64) {
    counter!("traffic_frames_total", "instance" => instance_id.to_string()).increment(1);
    histogram!("traffic_frame_time_ms", "instance" => instance_id.to_string())
        .record(frame_time_ms);
}

/// 记录一次 step 超时
pub fn record_step_timeout(instance_id: &str) {
    counter!("traffic_step_timeouts_total", "instance" => instance_id.to_string()).increment(1);
}

/// 记录本帧执行的延迟命令数
pub fn record_commands_executed(instance_id: &str, count: usize) {
    if count > 0 {
        counter!(
            "traffic_commands_executed_total",
            "instance" => instance_id.to_string()
        )
        .increment(count as u64);
    }
}

/// 从 ChangeSet 记录实体变更
pub fn record_change_set(instance_id: &str, changes: &ChangeSet) {
    let by_change = [
        ("appeared", changes.appeared.len()),
        ("disappeared", changes.disappeared.len()),
        ("updated", changes.updated.len()),
    ];
    for (change, count) in by_change {
        if count > 0 {
            counter!(
                "traffic_entities_changed_total",
                "instance" => instance_id.to_string(),
                "change" => change
            )
            .increment(count as u64);
        }
    }
}

/// 记录数据存储操作 (op = set/get/ping)
pub fn record_store_op(op: &'static str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("traffic_store_ops_total", "op" => op, "status" => status).increment(1);
}

/// 记录重连结果
pub fn record_store_reconnect(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("traffic_store_reconnects_total", "status" => status).increment(1);
}

/// 记录集群重定向
pub fn record_store_redirect() {
    counter!("traffic_store_redirects_total").increment(1);
}

/// 记录连接池大小
pub fn record_pool_connectors(active: usize, idle: usize) {
    gauge!("traffic_pool_connectors", "state" => "active").set(active as f64);
    gauge!("traffic_pool_connectors", "state" => "idle").set(idle as f64);
}

/// 帧耗时聚合器
///
/// 在内存中聚合帧耗时，周期性输出窗口统计并在结束时输出总摘要。
#[derive(Debug, Clone, Default)]
pub struct FrameTimingAggregator {
    /// 总帧数
    pub total_frames: u64,

    /// step 超时次数
    pub step_timeouts: u64,

    /// 已执行命令数
    pub commands_executed: u64,

    /// 全程帧耗时统计
    pub frame_stats: RunningStats,

    /// 当前日志窗口内的帧耗时统计
    pub window_stats: RunningStats,
}

impl FrameTimingAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一帧的耗时与命令数
    pub fn record_frame(&mut self, frame_time_ms: f64, commands: usize) {
        self.total_frames += 1;
        self.commands_executed += commands as u64;
        self.frame_stats.push(frame_time_ms);
        self.window_stats.push(frame_time_ms);
    }

    pub fn record_timeout(&mut self) {
        self.step_timeouts += 1;
    }

    /// 取出当前窗口统计并清空窗口
    pub fn take_window(&mut self) -> StatsSummary {
        let summary = StatsSummary::from(&self.window_stats);
        self.window_stats = RunningStats::default();
        summary
    }

    /// 生成摘要报告
    pub fn summary(&self) -> TimingSummary {
        TimingSummary {
            total_frames: self.total_frames,
            step_timeouts: self.step_timeouts,
            commands_executed: self.commands_executed,
            frame_time_ms: StatsSummary::from(&self.frame_stats),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 帧耗时摘要
#[derive(Debug, Clone, Default)]
pub struct TimingSummary {
    pub total_frames: u64,
    pub step_timeouts: u64,
    pub commands_executed: u64,
    pub frame_time_ms: StatsSummary,
}

impl std::fmt::Display for TimingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Frame Timing Summary ===")?;
        writeln!(f, "Total frames: {}", self.total_frames)?;
        writeln!(f, "Step timeouts: {}", self.step_timeouts)?;
        writeln!(f, "Commands executed: {}", self.commands_executed)?;
        writeln!(f, "Frame time (ms): {}", self.frame_time_ms)?;
        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_window_resets() {
        let mut agg = FrameTimingAggregator::new();
        agg.record_frame(10.0, 2);
        agg.record_frame(20.0, 0);
        agg.record_timeout();

        let window = agg.take_window();
        assert_eq!(window.count, 2);
        assert!((window.mean - 15.0).abs() < 1e-10);
        assert_eq!(agg.take_window().count, 0);

        // 总统计不受窗口清空影响
        let summary = agg.summary();
        assert_eq!(summary.total_frames, 2);
        assert_eq!(summary.step_timeouts, 1);
        assert_eq!(summary.commands_executed, 2);
        assert_eq!(summary.frame_time_ms.count, 2);
    }

    #[test]
    fn test_summary_display() {
        let summary = TimingSummary {
            total_frames: 100,
            step_timeouts: 1,
            commands_executed: 12,
            frame_time_ms: StatsSummary {
                count: 100,
                min: 20.0,
                max: 80.0,
                mean: 33.0,
                std_dev: 4.0,
            },
        };

        let output = format!("{summary}");
        assert!(output.contains("Total frames: 100"));
        assert!(output.contains("mean=33.000"));
        assert_eq!(format!("{}", StatsSummary::default()), "N/A");
    }

    #[test]
    fn test_record_functions_without_recorder() {
        // 未安装 recorder 时为 no-op
        record_frame("XD", 12.0);
        record_change_set("XD", &ChangeSet::default());
        record_store_op("set", true);
        record_pool_connectors(1, 0);
    }
}
