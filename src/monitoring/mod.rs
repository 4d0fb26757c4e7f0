//! パイプライン監視
//!
//! このモジュールは、受信サンプルのスループット計測とアーカイブを提供します。

pub mod accumulator;

pub use accumulator::{AccumulatorSnapshot, ArchivedSample, MetricsAccumulator};
