//! 资源预算控制
//!
//! 每个会话维护一份累计消耗账本与固定上限。调用后端前可用廉价估算做预检，
//! 调用后必须累加后端上报的精确用量（永不累加估算值）。累计值单调不减，
//! 除新建会话外不会重置。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::EngineError;
use crate::llm::UsageReport;

/// 资源单位估算器（简单的字符计数近似）
///
/// 英文约 4 字符/单位，非 ASCII 约 1.5 字符/单位；仅用于调用前的 best-effort 预检。
pub struct CostEstimator;

impl CostEstimator {
    /// 估算一段文本的资源单位数
    pub fn estimate(text: &str) -> u64 {
        let mut ascii_chars: u64 = 0;
        let mut non_ascii_chars: u64 = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let units = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as u64;
        units.max(1)
    }
}

/// 会话级预算账本：固定上限 + 原子累计值
#[derive(Debug)]
pub struct BudgetTracker {
    ceiling: u64,
    consumed: AtomicU64,
}

impl BudgetTracker {
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            consumed: AtomicU64::new(0),
        }
    }

    /// 用暂停快照的用量作为起点（仅在会话恢复时使用一次）
    pub(crate) fn seed(&mut self, consumed: u64) {
        *self.consumed.get_mut() = consumed;
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// 当前累计消耗
    pub fn total(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    /// 剩余可用额度
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.total())
    }

    /// 累计值是否已达上限（会话终态判定）
    pub fn exhausted(&self) -> bool {
        self.total() >= self.ceiling
    }

    /// 调用前预检：估算值超出剩余额度则直接短路，避免一次注定失败的后端调用
    pub fn precheck(&self, estimate: u64) -> Result<(), EngineError> {
        if estimate > self.remaining() {
            return Err(EngineError::BudgetExceeded {
                total: self.total(),
            });
        }
        Ok(())
    }

    /// 调用后记账：累加本轮精确用量，返回新的累计值
    pub fn record(&self, usage: &UsageReport) -> u64 {
        self.consumed.fetch_add(usage.total_units, Ordering::Relaxed) + usage.total_units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(n: u64) -> UsageReport {
        UsageReport {
            prompt_units: n / 2,
            completion_units: n - n / 2,
            total_units: n,
        }
    }

    #[test]
    fn test_estimator_ascii() {
        let tokens = CostEstimator::estimate("Hello, world! This is a test.");
        assert!(tokens > 0);
        assert!(tokens < 29);
    }

    #[test]
    fn test_estimator_never_zero() {
        assert_eq!(CostEstimator::estimate(""), 1);
    }

    #[test]
    fn test_total_is_monotonic() {
        let tracker = BudgetTracker::new(10_000);
        let mut last = 0;
        for n in [0, 120, 0, 530, 7] {
            let total = tracker.record(&usage(n));
            assert!(total >= last);
            last = total;
        }
        assert_eq!(tracker.total(), 657);
    }

    #[test]
    fn test_precheck_short_circuits_before_second_turn() {
        // 场景 E：上限 1000，两轮分别上报 500 与 700
        let tracker = BudgetTracker::new(1000);
        assert!(tracker.precheck(500).is_ok());
        tracker.record(&usage(500));

        // 第二轮预检：估算 700 > 剩余 500，应在调用后端前报 BudgetExceeded
        let err = tracker.precheck(700).unwrap_err();
        match err {
            EngineError::BudgetExceeded { total } => assert_eq!(total, 500),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exhausted_after_ceiling() {
        let tracker = BudgetTracker::new(100);
        tracker.record(&usage(100));
        assert!(tracker.exhausted());
        assert_eq!(tracker.remaining(), 0);
    }
}
