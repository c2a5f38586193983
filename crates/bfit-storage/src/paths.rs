//! 存储路径方案

/// DICOM实例文件路径
pub fn instance_path(owner: &str, study_id: &str, series_id: &str, filename: &str) -> String {
    format!("{owner}/studies/{study_id}/series/{series_id}/instances/{filename}")
}

/// 分析结果文件路径（分割掩膜与中间产物共用）
pub fn analysis_path(owner: &str, analysis_id: &str, filename: &str) -> String {
    format!("{owner}/analysis/{analysis_id}/{filename}")
}

/// 报告文件路径
pub fn report_path(owner: &str, report_id: &str, filename: &str) -> String {
    format!("{owner}/reports/{report_id}/{filename}")
}
