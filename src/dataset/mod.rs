//! データセットの索引付け・分割・バッチ化

pub mod batcher;
pub mod index;
pub mod split;

pub use batcher::{ImageBatch, ImageItem, TransferBatch, TransferBatcher};
pub use index::{class_counts, list_class_files, LabelSet, RESERVED_ENTRY};
pub use split::{BatchIter, BatchStream, Partition, RepeatIter, Sample, SampleSet, SplitConfig, SplitLoader};
