//! 返回码与严重级别

use serde::{Deserialize, Serialize};
use std::fmt;

/// 执行返回码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ReturnCode {
    /// 成功
    #[default]
    #[serde(rename = "OK")]
    Ok,
    /// 警告
    #[serde(rename = "WE")]
    Warning,
    /// 失败
    #[serde(rename = "KO")]
    Fail,
    /// 致命失败 (默认策略下停止后续步骤)
    #[serde(rename = "FA")]
    Fatal,
    /// 条件不满足而跳过
    #[serde(rename = "NA")]
    NotApplicable,
    /// 未执行
    #[serde(rename = "NE")]
    NotExecuted,
    /// 已中止
    #[serde(rename = "CA")]
    Aborted,
    /// 执行中
    #[serde(rename = "PE")]
    Pending,
}

impl ReturnCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnCode::Ok => "OK",
            ReturnCode::Warning => "WE",
            ReturnCode::Fail => "KO",
            ReturnCode::Fatal => "FA",
            ReturnCode::NotApplicable => "NA",
            ReturnCode::NotExecuted => "NE",
            ReturnCode::Aborted => "CA",
            ReturnCode::Pending => "PE",
        }
    }

    /// 严重级别，中性返回码 (NA / NE / PE) 不参与汇总
    pub fn severity(&self) -> Option<u8> {
        match self {
            ReturnCode::Ok => Some(1),
            ReturnCode::Warning => Some(2),
            ReturnCode::Fail => Some(3),
            ReturnCode::Fatal => Some(4),
            ReturnCode::Aborted => Some(5),
            ReturnCode::NotApplicable | ReturnCode::NotExecuted | ReturnCode::Pending => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ReturnCode::Fail | ReturnCode::Fatal | ReturnCode::Aborted
        )
    }

    /// 取严重级别最高的返回码，空集合为 OK
    pub fn aggregate<I>(codes: I) -> ReturnCode
    where
        I: IntoIterator<Item = ReturnCode>,
    {
        codes
            .into_iter()
            .filter_map(|c| c.severity().map(|s| (s, c)))
            .max_by_key(|(s, _)| *s)
            .map(|(_, c)| c)
            .unwrap_or(ReturnCode::Ok)
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
