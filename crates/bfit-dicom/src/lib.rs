//! # BFIT DICOM模块
//!
//! 负责DICOM系列的采集协议分类与批量聚合：
//! - 协议分类器：按规则表将采集元数据映射到解剖部位标签
//! - ASCCONV协议解析：从西门子CSA头中提取协议名
//! - 系列聚合器：把上传的文件分组为 检查/系列/实例 三级结构

pub mod aggregator;
pub mod classifier;
pub mod protocol;
pub mod reader;

pub use aggregator::{SeriesAggregator, SortedBatch, SortedInstance, SeriesMeta, StudyMeta};
pub use classifier::{ProtocolMeta, ProtocolRule, RuleTable, ScanOptions};
pub use protocol::parse_protocol_data;
pub use reader::{DicomFileReader, DicomTags, TagReader};
