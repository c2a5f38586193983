//! 西门子CSA协议头解析
//!
//! MrProtocol/MrPhoenixProtocol元素是一大段文本，其中以ASCCONV
//! 定界符包裹一块INI风格的 name=value 列表。定界符之外的内容全部
//! 忽略；找不到成对定界符不视为致命错误，返回空结果并记录告警。

use std::collections::HashMap;
use tracing::warn;

const ASCCONV_BEGIN: &str = "### ASCCONV BEGIN ###";
const ASCCONV_END: &str = "### ASCCONV END ###";

/// 两段式解析：先定位ASCCONV段，再逐行解析 key=value
pub fn parse_protocol_data(protocol_data: &str) -> HashMap<String, String> {
    let start = protocol_data.find(ASCCONV_BEGIN);
    let end = protocol_data.find(ASCCONV_END);

    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if s + ASCCONV_BEGIN.len() <= e => (s + ASCCONV_BEGIN.len(), e),
        _ => {
            warn!("Parsing protocol tags failed, unable to find ASCCONV delimiters!");
            return HashMap::new();
        }
    };

    protocol_data[start..end]
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// 从ASCCONV字典中取出协议名；文本值带双重引号，需要剥除
pub fn protocol_name_from(ascconv: &HashMap<String, String>) -> Option<String> {
    let raw = ascconv.get("tProtocolName")?;
    let unquoted = raw.trim_matches('"');
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}
