//! 通用工具函数

use chrono::NaiveDate;

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 64 && uid.chars().all(|c| c.is_numeric() || c == '.')
}

/// 解析DICOM日期标签 (YYYYMMDD)，格式不合法时返回None
pub fn parse_dicom_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y%m%d").ok()
}

/// 截断过长的日志内容
pub fn truncate_for_log(msg: &str, max_length: usize) -> String {
    if msg.len() > max_length {
        let cut: String = msg.chars().take(max_length).collect();
        format!("{cut}...")
    } else {
        msg.to_string()
    }
}
