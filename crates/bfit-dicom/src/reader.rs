//! DICOM标签读取边界
//!
//! 聚合器只依赖`TagReader`抽象；真实实现基于dicom-rs。文件格式
//! 解析本身不在本系统范围内。

use std::path::Path;

use bfit_core::{BfitError, Result};
use dicom::core::value::{PrimitiveValue, Value};
use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{open_file, DefaultDicomObject};
use tracing::debug;

use crate::classifier::ScanOptions;

/// 西门子CSA系列头私有标签 (0029,1020)
const CSA_SERIES_HEADER: Tag = Tag(0x0029, 0x1020);

/// 图像存储类SOP Class UID
const IMAGE_STORAGE_SOP_CLASSES: [&str; 3] = [
    "1.2.840.10008.5.1.4.1.1.2",   // CT Image Storage
    "1.2.840.10008.5.1.4.1.1.2.1", // Enhanced CT Image Storage
    "1.2.840.10008.5.1.4.1.1.4",   // MR Image Storage
];

/// 单个DICOM文件提取出的原始标签集合
#[derive(Debug, Clone, Default)]
pub struct DicomTags {
    pub study_uid: Option<String>,
    pub series_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub sop_class_uid: Option<String>,
    pub modality: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub study_date: Option<String>,
    pub series_description: Option<String>,
    pub number_of_frames: Option<i64>,
    pub instance_number: Option<i64>,
    pub scan_options: ScanOptions,
    pub pixel_bandwidth: Option<String>,
    /// CSA系列头原始内容（按文本看待，供ASCCONV解析）
    pub csa_series_header: Option<String>,
}

impl DicomTags {
    /// 判断是否图像系列：Modality为CT/MR，或SOP Class属图像存储类。
    /// 结构化报告等非图像系列据此被跳过。
    pub fn is_image(&self) -> bool {
        if let Some(modality) = &self.modality {
            if modality == "CT" || modality == "MR" {
                return true;
            }
        }
        self.sop_class_uid
            .as_deref()
            .map(|uid| IMAGE_STORAGE_SOP_CLASSES.contains(&uid.trim_end_matches('\0').trim()))
            .unwrap_or(false)
    }
}

/// 标签读取接口
pub trait TagReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<DicomTags>;
}

impl TagReader for Box<dyn TagReader> {
    fn read_tags(&self, path: &Path) -> Result<DicomTags> {
        (**self).read_tags(path)
    }
}

/// 基于dicom-rs的标签读取器
#[derive(Debug, Default)]
pub struct DicomFileReader;

impl DicomFileReader {
    pub fn new() -> Self {
        Self
    }

    fn get_string_element(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
        match obj.element(tag) {
            Ok(element) => match element.value() {
                Value::Primitive(PrimitiveValue::Str(s)) => Some(s.trim().to_string()),
                Value::Primitive(PrimitiveValue::Strs(strings)) => {
                    strings.first().map(|s| s.trim().to_string())
                }
                _ => {
                    debug!("标签 {:?} 不是字符串类型", tag);
                    None
                }
            },
            Err(_) => None,
        }
    }

    fn get_integer_element(obj: &DefaultDicomObject, tag: Tag) -> Option<i64> {
        match obj.element(tag) {
            Ok(element) => match element.value() {
                Value::Primitive(PrimitiveValue::I32(i)) => i.iter().next().map(|&v| v as i64),
                Value::Primitive(PrimitiveValue::U32(u)) => u.iter().next().map(|&v| v as i64),
                Value::Primitive(PrimitiveValue::I16(i)) => i.iter().next().map(|&v| v as i64),
                Value::Primitive(PrimitiveValue::U16(u)) => u.iter().next().map(|&v| v as i64),
                Value::Primitive(PrimitiveValue::I64(i)) => i.iter().next().copied(),
                Value::Primitive(PrimitiveValue::U64(u)) => u.iter().next().map(|&v| v as i64),
                // IS (Integer String) 值以字符串形式存储
                Value::Primitive(PrimitiveValue::Str(s)) => s.trim().parse().ok(),
                Value::Primitive(PrimitiveValue::Strs(strings)) => {
                    strings.first().and_then(|s| s.trim().parse().ok())
                }
                _ => None,
            },
            Err(_) => None,
        }
    }

    fn get_scan_options(obj: &DefaultDicomObject) -> ScanOptions {
        match obj.element(tags::SCAN_OPTIONS) {
            Ok(element) => match element.value() {
                Value::Primitive(PrimitiveValue::Str(s)) => {
                    ScanOptions::Single(s.trim().to_string())
                }
                Value::Primitive(PrimitiveValue::Strs(strings)) => {
                    let items: Vec<String> =
                        strings.iter().map(|s| s.trim().to_string()).collect();
                    match items.len() {
                        0 => ScanOptions::Missing,
                        1 => ScanOptions::Single(items.into_iter().next().unwrap()),
                        _ => ScanOptions::Multi(items),
                    }
                }
                _ => ScanOptions::Missing,
            },
            Err(_) => ScanOptions::Missing,
        }
    }

    fn get_bytes_as_text(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
        match obj.element(tag) {
            Ok(element) => match element.value() {
                Value::Primitive(PrimitiveValue::U8(bytes)) => {
                    Some(String::from_utf8_lossy(bytes.as_slice()).into_owned())
                }
                Value::Primitive(PrimitiveValue::Str(s)) => Some(s.to_string()),
                _ => None,
            },
            Err(_) => None,
        }
    }
}

impl TagReader for DicomFileReader {
    fn read_tags(&self, path: &Path) -> Result<DicomTags> {
        let obj = open_file(path)
            .map_err(|e| BfitError::Dicom(format!("无法解析DICOM文件 {:?}: {:?}", path, e)))?;

        Ok(DicomTags {
            study_uid: Self::get_string_element(&obj, tags::STUDY_INSTANCE_UID),
            series_uid: Self::get_string_element(&obj, tags::SERIES_INSTANCE_UID),
            sop_instance_uid: Self::get_string_element(&obj, tags::SOP_INSTANCE_UID),
            sop_class_uid: Self::get_string_element(&obj, tags::SOP_CLASS_UID),
            modality: Self::get_string_element(&obj, tags::MODALITY),
            patient_id: Self::get_string_element(&obj, tags::PATIENT_ID),
            patient_name: Self::get_string_element(&obj, tags::PATIENT_NAME),
            study_date: Self::get_string_element(&obj, tags::STUDY_DATE),
            series_description: Self::get_string_element(&obj, tags::SERIES_DESCRIPTION),
            number_of_frames: Self::get_integer_element(&obj, tags::NUMBER_OF_FRAMES),
            instance_number: Self::get_integer_element(&obj, tags::INSTANCE_NUMBER),
            scan_options: Self::get_scan_options(&obj),
            pixel_bandwidth: Self::get_string_element(&obj, tags::PIXEL_BANDWIDTH),
            csa_series_header: Self::get_bytes_as_text(&obj, CSA_SERIES_HEADER),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_series_check_by_modality() {
        let tags = DicomTags {
            modality: Some("CT".to_string()),
            ..Default::default()
        };
        assert!(tags.is_image());

        let sr = DicomTags {
            modality: Some("SR".to_string()),
            ..Default::default()
        };
        assert!(!sr.is_image());
    }

    #[test]
    fn test_image_series_check_by_sop_class() {
        let tags = DicomTags {
            modality: Some("OT".to_string()),
            sop_class_uid: Some("1.2.840.10008.5.1.4.1.1.4".to_string()),
            ..Default::default()
        };
        assert!(tags.is_image());
    }
}
