//! 系列聚合器
//!
//! 把一批无序上传的DICOM文件落盘到受管临时目录，按
//! (Study Instance UID, Series Instance UID) 分组，跳过非图像系列，
//! 对每组做协议分类，并为匹配的系列提取逐实例元数据。
//!
//! 摄取是逐文件尽力而为的：单个坏文件只中止该文件的处理，
//! 不中止整个批次。

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use bfit_core::utils::is_valid_dicom_uid;
use bfit_core::{Anatomy, Modality, Result};
use serde_json::json;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::classifier::{ProtocolMeta, RuleTable};
use crate::protocol::{parse_protocol_data, protocol_name_from};
use crate::reader::{DicomTags, TagReader};

/// 检查级元数据缓存
#[derive(Debug, Clone)]
pub struct StudyMeta {
    pub patient_id: String,
    pub patient_name: String,
    /// 原始DICOM日期文本 (YYYYMMDD)
    pub study_date: Option<String>,
}

/// 系列级元数据缓存
#[derive(Debug, Clone)]
pub struct SeriesMeta {
    pub modality: Modality,
    pub anatomy: Anatomy,
}

/// 聚合后的单个实例
#[derive(Debug)]
pub struct SortedInstance {
    pub instance_id: String,
    pub frame_number: i64,
    pub metadata: serde_json::Value,
    pub filename: String,
    /// 临时目录内的文件路径，在`SortedBatch`存活期间有效
    pub path: PathBuf,
}

/// 聚合结果：study_id -> series_id -> 实例列表，外加两级元数据缓存
///
/// 持有临时目录句柄，批次落库前文件保持可读；任何退出路径上
/// 目录都会被清理。
pub struct SortedBatch {
    pub studies: BTreeMap<String, BTreeMap<String, Vec<SortedInstance>>>,
    pub study_meta: HashMap<String, StudyMeta>,
    pub series_meta: HashMap<String, SeriesMeta>,
    _tmpdir: TempDir,
}

impl SortedBatch {
    pub fn is_empty(&self) -> bool {
        self.studies.is_empty()
    }
}

/// 系列聚合器
pub struct SeriesAggregator<R: TagReader> {
    reader: R,
    rules: RuleTable,
}

impl<R: TagReader> SeriesAggregator<R> {
    pub fn new(reader: R, rules: RuleTable) -> Self {
        Self { reader, rules }
    }

    /// 聚合一批上传文件 (文件名, 内容)
    pub fn sort(&self, files: Vec<(String, Vec<u8>)>) -> Result<SortedBatch> {
        let tmpdir = TempDir::new()?;

        // 1. 上传内容落盘
        let mut paths = Vec::with_capacity(files.len());
        for (name, data) in files {
            let safe_name = sanitize_filename(&name);
            let path = tmpdir.path().join(&safe_name);
            std::fs::write(&path, data)?;
            debug!("Saved file to {:?}", path);
            paths.push((safe_name, path));
        }

        // 2. 读取标签并按 (StudyUID, SeriesUID) 分组
        let mut groups: BTreeMap<(String, String), Vec<(String, PathBuf, DicomTags)>> =
            BTreeMap::new();
        for (name, path) in paths {
            let tags = match self.reader.read_tags(&path) {
                Ok(tags) => tags,
                Err(e) => {
                    // 坏文件只影响自身
                    warn!("Invalid Dicom file {}: {}", name, e);
                    continue;
                }
            };
            match (tags.study_uid.clone(), tags.series_uid.clone()) {
                (Some(study_uid), Some(series_uid))
                    if is_valid_dicom_uid(&study_uid) && is_valid_dicom_uid(&series_uid) =>
                {
                    groups
                        .entry((study_uid, series_uid))
                        .or_default()
                        .push((name, path, tags));
                }
                _ => {
                    info!(
                        "Instance {} is missing or carries a malformed Study/Series Instance UID and will not be processed",
                        name
                    );
                }
            }
        }

        let mut studies: BTreeMap<String, BTreeMap<String, Vec<SortedInstance>>> = BTreeMap::new();
        let mut study_meta = HashMap::new();
        let mut series_meta = HashMap::new();

        // 3. 逐系列：图像检查 -> 协议分类 -> 实例元数据
        for ((study_uid, series_uid), members) in groups {
            let first = &members[0].2;
            if !first.is_image() {
                // 结构化报告等非图像系列静默跳过
                debug!("Series {} is not an image series, skipping", series_uid);
                continue;
            }

            let protocol_name = first
                .csa_series_header
                .as_deref()
                .and_then(|blob| protocol_name_from(&parse_protocol_data(blob)));
            let meta = ProtocolMeta {
                protocol_name,
                scan_options: first.scan_options.clone(),
                pixel_bandwidth: first.pixel_bandwidth.clone(),
            };
            debug!(
                "Checking match to ProtocolName {:?}, ScanOptions {:?}, PixelBandwidth {:?}",
                meta.protocol_name, meta.scan_options, meta.pixel_bandwidth
            );

            let (is_matched, anatomy) = self.rules.classify(&meta);
            if !is_matched {
                // 未匹配的系列整体丢弃，不产生任何部分记录
                debug!("No match for series {}, dropping", series_uid);
                continue;
            }
            let anatomy = anatomy.unwrap_or(Anatomy::Other("unknown".to_string()));

            let modality = match first.modality.as_deref().map(Modality::parse) {
                Some(Ok(m)) => m,
                _ => {
                    warn!(
                        "Series {} matched but carries unsupported modality {:?}",
                        series_uid, first.modality
                    );
                    continue;
                }
            };

            let mut instances = Vec::new();
            for (name, path, tags) in &members {
                let instance_id = match &tags.sop_instance_uid {
                    Some(uid) => uid.clone(),
                    None => {
                        info!(
                            "Instance {} is missing SOP Instance UID and will not be processed",
                            name
                        );
                        continue;
                    }
                };
                let frame_number = tags.instance_number.unwrap_or(1);
                let metadata = json!({
                    "Patient ID": tags.patient_id.clone().unwrap_or_default(),
                    "Patient Name": tags.patient_name.clone().unwrap_or_default(),
                    "Study Instance UID": study_uid.clone(),
                    "Study Date": tags.study_date.clone(),
                    "Series Instance UID": series_uid.clone(),
                    "SOP Instance UID": instance_id.clone(),
                    "Number of Frames": tags.number_of_frames,
                    "Frame Number": frame_number,
                    "Modality": tags.modality.clone(),
                    "Series Description": tags.series_description.clone().unwrap_or_default(),
                });
                instances.push(SortedInstance {
                    instance_id,
                    frame_number,
                    metadata,
                    filename: name.clone(),
                    path: path.clone(),
                });
            }
            if instances.is_empty() {
                continue;
            }

            study_meta.entry(study_uid.clone()).or_insert_with(|| StudyMeta {
                patient_id: first.patient_id.clone().unwrap_or_default(),
                patient_name: first.patient_name.clone().unwrap_or_default(),
                study_date: first.study_date.clone(),
            });
            series_meta.insert(
                series_uid.clone(),
                SeriesMeta {
                    modality,
                    anatomy,
                },
            );
            studies
                .entry(study_uid)
                .or_default()
                .insert(series_uid, instances);
        }

        Ok(SortedBatch {
            studies,
            study_meta,
            series_meta,
            _tmpdir: tmpdir,
        })
    }
}

/// 把客户端文件名压平为安全的单段文件名
fn sanitize_filename(name: &str) -> String {
    name.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect::<Vec<_>>()
        .join("_")
        .replace(':', "_")
}
