//! 采集协议分类器
//!
//! 对 (协议名, 扫描选项, 像素带宽) 三元组做纯函数分类，输出解剖部位
//! 标签。规则按表序求值，首个命中即生效。

use bfit_core::Anatomy;
use serde::Deserialize;

/// ScanOptions标签值——可能是标量，也可能是多值
///
/// 多值的ScanOptions一律判为不匹配：来源数据含糊时拒绝而不猜测。
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScanOptions {
    #[default]
    Missing,
    Single(String),
    Multi(Vec<String>),
}

/// 分类器输入：从系列首个文件提取的采集元数据
#[derive(Debug, Clone, Default)]
pub struct ProtocolMeta {
    pub protocol_name: Option<String>,
    pub scan_options: ScanOptions,
    /// DICOM Decimal String，保留原始文本
    pub pixel_bandwidth: Option<String>,
}

/// 单条匹配规则
///
/// 字段名与配置JSON (dicom_config.json) 保持一致。
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolRule {
    #[serde(rename = "ProtocolName")]
    pub protocol_name: String,
    #[serde(rename = "ScanOptions")]
    pub scan_options: String,
    #[serde(rename = "PixelBandwidth")]
    pub pixel_bandwidth: f64,
    #[serde(rename = "Tag")]
    pub tag: String,
}

/// 有序规则表
#[derive(Debug, Clone, Deserialize)]
pub struct RuleTable {
    pub rules: Vec<ProtocolRule>,
}

/// 规范化标签文本：多值以空格拼接，去空白，转小写，
/// 并把UTF-7转义残留 "+af8-" 还原为下划线
pub fn clean(value: &str) -> String {
    value.trim().to_lowercase().replace("+af8-", "_")
}

fn clean_scan_options(opts: &ScanOptions) -> String {
    match opts {
        ScanOptions::Missing => String::new(),
        ScanOptions::Single(s) => clean(s),
        ScanOptions::Multi(items) => clean(&items.join(" ")),
    }
}

fn bandwidth_of(meta: &ProtocolMeta) -> f64 {
    meta.pixel_bandwidth
        .as_deref()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(-1.0)
}

impl RuleTable {
    /// 从JSON文本加载规则表
    pub fn from_json(json: &str) -> bfit_core::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 内置规则表，未提供规则配置文件时使用。
    /// 与[`legacy_classify`]覆盖相同的两种采集协议。
    pub fn builtin() -> Self {
        Self {
            rules: vec![
                ProtocolRule {
                    protocol_name: "t1+AF8-vibe+AF8-tra+AF8-p2+AF8-bh+AF8-320+AF8-DIXON Thigh"
                        .to_string(),
                    scan_options: "SAT2".to_string(),
                    pixel_bandwidth: 504.0,
                    tag: "thigh".to_string(),
                },
                ProtocolRule {
                    protocol_name: "t1+AF8-vibe+AF8-tra+AF8-p2+AF8-bh+AF8-dixon abd".to_string(),
                    scan_options: "DIXF".to_string(),
                    pixel_bandwidth: 849.0,
                    tag: "abd".to_string(),
                },
            ],
        }
    }

    /// 规则表分类：协议名子串匹配 + 扫描选项子串匹配 +
    /// 带宽容差匹配 (|Δ| < 0.01)
    pub fn classify(&self, meta: &ProtocolMeta) -> (bool, Option<Anatomy>) {
        let protocol = match &meta.protocol_name {
            Some(name) => clean(name),
            None => return (false, None),
        };
        if matches!(meta.scan_options, ScanOptions::Multi(_)) {
            return (false, None);
        }
        let scanopt = clean_scan_options(&meta.scan_options);
        let bw = bandwidth_of(meta);

        for rule in &self.rules {
            if protocol.contains(&clean(&rule.protocol_name))
                && scanopt.contains(&clean(&rule.scan_options))
                && (bw - rule.pixel_bandwidth).abs() < 1e-2
            {
                return (true, Some(Anatomy::from(rule.tag.as_str())));
            }
        }
        (false, None)
    }
}

/// 旧版内置匹配器：协议名全等、扫描选项全等、带宽浮点全等。
/// 两条硬编码规则（大腿 SAT2/504、腹部 DIXF/849）。
pub fn legacy_classify(meta: &ProtocolMeta) -> (bool, Option<Anatomy>) {
    let protocol_name = match &meta.protocol_name {
        Some(name) => name.as_str(),
        None => return (false, None),
    };
    let scan_options = match &meta.scan_options {
        ScanOptions::Single(s) => s.as_str(),
        // 多值或缺失的扫描选项一律不匹配
        _ => return (false, None),
    };
    let bw = bandwidth_of(meta);

    if protocol_name == "t1+AF8-vibe+AF8-tra+AF8-p2+AF8-bh+AF8-320+AF8-DIXON Thigh"
        && scan_options == "SAT2"
        && bw == 504.0
    {
        return (true, Some(Anatomy::Thigh));
    }

    if protocol_name == "t1+AF8-vibe+AF8-tra+AF8-p2+AF8-bh+AF8-dixon abd"
        && scan_options == "DIXF"
        && bw == 849.0
    {
        return (true, Some(Anatomy::Abd));
    }

    (false, None)
}
