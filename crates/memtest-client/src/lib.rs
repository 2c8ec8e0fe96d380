//! # Memtest Client - 激光与电测量的软件时钟同步
//!
//! 两个独立触发的设备（源表 + 激光）在没有硬件触发线的情况下，通过共享的
//! 单调时钟对齐到同一个时间零点。
//!
//! ## 模块
//!
//! - `synchronizer` - 会话编排（Protocol A 两阶段 / Protocol B 退化）
//! - `firing` - 激光时间表执行
//! - `calibration` - 对齐诊断与校准偏移估计
//!
//! ## 使用示例
//!
//! ```no_run
//! use memtest_client::{SyncRequest, SynchronizerBuilder};
//! use memtest_instrument::CancelToken;
//! use memtest_protocol::PatternSpec;
//! # fn demo(
//! #     adapter: &mut dyn memtest_instrument::InstrumentAdapter,
//! #     laser: &mut dyn memtest_instrument::LaserDriver,
//! # ) -> Result<(), memtest_client::SyncError> {
//! let sync = SynchronizerBuilder::new().build();
//! let request = SyncRequest::new(PatternSpec::new("1011", 0.1, 0.1).with_repeats(2), 3.0, 0.01);
//! let session = sync.run_laser_and_read(adapter, laser, &request, &CancelToken::new())?;
//! println!("{} samples, {} intervals fired", session.result.len(), session.fired.len());
//! # Ok(())
//! # }
//! ```

mod calibration;
mod error;
mod firing;
mod session;
mod synchronizer;

pub use calibration::{
    AlignmentCheck, AlignmentEntry, AlignmentReport, CalibrationSuggestion,
    DEFAULT_BASELINE_SAMPLES, DEFAULT_RELATIVE_THRESHOLD, suggest_offset,
};
pub use error::SyncError;
pub use firing::fit_schedule;
pub use session::{SyncProtocol, SyncRequest, SyncSession, SyncState};
pub use synchronizer::{MAX_INIT_TIME_S, Synchronizer, SynchronizerBuilder};
