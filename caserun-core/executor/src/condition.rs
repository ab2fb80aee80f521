//! 条件判断
//!
//! 步骤 / 动作 / 控制的执行条件与循环条件共用同一组操作符。
//! 判断是纯函数: 只读取已替换的操作数与执行上下文，不修改任何状态。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::definition::ConditionOption;

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    #[default]
    Always,
    Never,
    IfPropertyExist,
    IfPropertyNotExist,
    IfNumericEqual,
    IfNumericDifferent,
    IfNumericGreater,
    IfNumericGreaterOrEqual,
    IfNumericMinor,
    IfNumericMinorOrEqual,
    #[serde(alias = "equals", alias = "EQUALS")]
    IfStringEqual,
    #[serde(alias = "notEquals", alias = "NOT_EQUALS")]
    IfStringDifferent,
    IfStringGreater,
    IfStringMinor,
    IfStringContains,
    IfStringNotContains,
    IfStringMatchRegex,
    IfStringEmpty,
    IfStringNotEmpty,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionOperator::Always => "always",
            ConditionOperator::Never => "never",
            ConditionOperator::IfPropertyExist => "ifPropertyExist",
            ConditionOperator::IfPropertyNotExist => "ifPropertyNotExist",
            ConditionOperator::IfNumericEqual => "ifNumericEqual",
            ConditionOperator::IfNumericDifferent => "ifNumericDifferent",
            ConditionOperator::IfNumericGreater => "ifNumericGreater",
            ConditionOperator::IfNumericGreaterOrEqual => "ifNumericGreaterOrEqual",
            ConditionOperator::IfNumericMinor => "ifNumericMinor",
            ConditionOperator::IfNumericMinorOrEqual => "ifNumericMinorOrEqual",
            ConditionOperator::IfStringEqual => "ifStringEqual",
            ConditionOperator::IfStringDifferent => "ifStringDifferent",
            ConditionOperator::IfStringGreater => "ifStringGreater",
            ConditionOperator::IfStringMinor => "ifStringMinor",
            ConditionOperator::IfStringContains => "ifStringContains",
            ConditionOperator::IfStringNotContains => "ifStringNotContains",
            ConditionOperator::IfStringMatchRegex => "ifStringMatchRegex",
            ConditionOperator::IfStringEmpty => "ifStringEmpty",
            ConditionOperator::IfStringNotEmpty => "ifStringNotEmpty",
        }
    }

    /// 操作符使用的操作数个数 (value1..value3 中的前 n 个)
    pub fn operand_count(&self) -> usize {
        match self {
            ConditionOperator::Always | ConditionOperator::Never => 0,
            ConditionOperator::IfPropertyExist
            | ConditionOperator::IfPropertyNotExist
            | ConditionOperator::IfStringEmpty
            | ConditionOperator::IfStringNotEmpty => 1,
            ConditionOperator::IfNumericEqual
            | ConditionOperator::IfNumericDifferent
            | ConditionOperator::IfNumericGreater
            | ConditionOperator::IfNumericGreaterOrEqual
            | ConditionOperator::IfNumericMinor
            | ConditionOperator::IfNumericMinorOrEqual
            | ConditionOperator::IfStringMatchRegex => 2,
            ConditionOperator::IfStringEqual
            | ConditionOperator::IfStringDifferent
            | ConditionOperator::IfStringGreater
            | ConditionOperator::IfStringMinor
            | ConditionOperator::IfStringContains
            | ConditionOperator::IfStringNotContains => 3,
        }
    }
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 条件判断错误 (记录为所属记录的 KO)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("{operator} 的操作数 {position} 不是数字: '{value}'")]
    NotNumeric {
        operator: ConditionOperator,
        position: usize,
        value: String,
    },

    #[error("无效的正则表达式 '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// 判断条件
///
/// `values` 为已替换的 value1..value3，未被操作符使用的操作数被忽略。
/// `options` 只随记录保存并传递给动作执行器，不影响判断结果。
pub fn evaluate(
    operator: ConditionOperator,
    values: [&str; 3],
    _options: &[ConditionOption],
    context: &ExecutionContext,
) -> Result<bool, ConditionError> {
    let [v1, v2, v3] = values;

    let result = match operator {
        ConditionOperator::Always => true,
        ConditionOperator::Never => false,

        ConditionOperator::IfPropertyExist => context.has_property(v1),
        ConditionOperator::IfPropertyNotExist => !context.has_property(v1),

        ConditionOperator::IfNumericEqual => compare_numeric(operator, v1, v2)? == Ordering::Equal,
        ConditionOperator::IfNumericDifferent => {
            compare_numeric(operator, v1, v2)? != Ordering::Equal
        }
        ConditionOperator::IfNumericGreater => {
            compare_numeric(operator, v1, v2)? == Ordering::Greater
        }
        ConditionOperator::IfNumericGreaterOrEqual => {
            compare_numeric(operator, v1, v2)? != Ordering::Less
        }
        ConditionOperator::IfNumericMinor => compare_numeric(operator, v1, v2)? == Ordering::Less,
        ConditionOperator::IfNumericMinorOrEqual => {
            compare_numeric(operator, v1, v2)? != Ordering::Greater
        }

        ConditionOperator::IfStringEqual => fold(v1, v3) == fold(v2, v3),
        ConditionOperator::IfStringDifferent => fold(v1, v3) != fold(v2, v3),
        ConditionOperator::IfStringGreater => fold(v1, v3) > fold(v2, v3),
        ConditionOperator::IfStringMinor => fold(v1, v3) < fold(v2, v3),
        ConditionOperator::IfStringContains => fold(v1, v3).contains(&fold(v2, v3)),
        ConditionOperator::IfStringNotContains => !fold(v1, v3).contains(&fold(v2, v3)),

        ConditionOperator::IfStringMatchRegex => {
            let re = Regex::new(v2).map_err(|e| ConditionError::InvalidRegex {
                pattern: v2.to_string(),
                reason: e.to_string(),
            })?;
            re.is_match(v1)
        }

        ConditionOperator::IfStringEmpty => v1.is_empty(),
        ConditionOperator::IfStringNotEmpty => !v1.is_empty(),
    };

    Ok(result)
}

/// 字符串比较的大小写处理: value3 为 "N" 时不区分大小写
fn fold(value: &str, case_flag: &str) -> String {
    if case_flag.eq_ignore_ascii_case("N") {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}

fn parse_numeric(
    operator: ConditionOperator,
    position: usize,
    value: &str,
) -> Result<f64, ConditionError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|n| !n.is_nan())
        .ok_or_else(|| ConditionError::NotNumeric {
            operator,
            position,
            value: value.to_string(),
        })
}

fn compare_numeric(
    operator: ConditionOperator,
    v1: &str,
    v2: &str,
) -> Result<Ordering, ConditionError> {
    let a = parse_numeric(operator, 1, v1)?;
    let b = parse_numeric(operator, 2, v2)?;
    Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("T1", "TC1", "FR", "QA", "WEB", CancellationToken::new());
        ctx.set_defined_properties("T1", "TC1", ["BASE_URL".to_string()]);
        ctx
    }

    fn eval(op: ConditionOperator, v1: &str, v2: &str, v3: &str) -> bool {
        evaluate(op, [v1, v2, v3], &[], &ctx()).unwrap()
    }

    #[test]
    fn test_always_never() {
        assert!(eval(ConditionOperator::Always, "", "", ""));
        assert!(!eval(ConditionOperator::Never, "", "", ""));
    }

    #[test]
    fn test_numeric_operators() {
        use ConditionOperator::*;
        assert!(eval(IfNumericEqual, "1", "1", ""));
        assert!(eval(IfNumericEqual, "1.0", " 1 ", ""));
        assert!(eval(IfNumericDifferent, "1", "2", ""));
        assert!(eval(IfNumericGreater, "10", "9", ""));
        assert!(eval(IfNumericGreaterOrEqual, "9", "9", ""));
        assert!(eval(IfNumericMinor, "-1", "0", ""));
        assert!(eval(IfNumericMinorOrEqual, "0", "0", ""));
        assert!(!eval(IfNumericMinor, "3", "2", ""));
    }

    #[test]
    fn test_numeric_parse_error() {
        let err = evaluate(
            ConditionOperator::IfNumericEqual,
            ["1", "abc", ""],
            &[],
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, ConditionError::NotNumeric { position: 2, .. }));
    }

    #[test]
    fn test_string_operators_and_case_flag() {
        use ConditionOperator::*;
        assert!(eval(IfStringEqual, "abc", "abc", ""));
        assert!(!eval(IfStringEqual, "abc", "ABC", ""));
        assert!(eval(IfStringEqual, "abc", "ABC", "N"));
        assert!(eval(IfStringDifferent, "abc", "abd", ""));
        assert!(eval(IfStringGreater, "b", "a", ""));
        assert!(eval(IfStringMinor, "a", "b", ""));
        assert!(eval(IfStringContains, "Hello World", "world", "N"));
        assert!(!eval(IfStringContains, "Hello World", "world", "Y"));
        assert!(eval(IfStringNotContains, "Hello", "bye", ""));
        assert!(eval(IfStringEmpty, "", "ignored", "ignored"));
        assert!(eval(IfStringNotEmpty, "x", "", ""));
    }

    #[test]
    fn test_regex() {
        assert!(eval(ConditionOperator::IfStringMatchRegex, "order-123", r"^order-\d+$", ""));
        let err = evaluate(
            ConditionOperator::IfStringMatchRegex,
            ["x", "(", ""],
            &[],
            &ctx(),
        )
        .unwrap_err();
        assert!(matches!(err, ConditionError::InvalidRegex { .. }));
    }

    #[test]
    fn test_property_exist() {
        assert!(eval(ConditionOperator::IfPropertyExist, "BASE_URL", "", ""));
        assert!(eval(ConditionOperator::IfPropertyNotExist, "MISSING", "", ""));
    }

    #[test]
    fn test_unused_operands_ignored() {
        use ConditionOperator::*;
        // 不使用的操作数即使不是数字 / 非法正则也不影响结果
        for junk in ["", "abc", "(", "999"] {
            assert!(eval(Always, junk, junk, junk));
            assert!(eval(IfNumericEqual, "1", "1", junk));
            assert!(eval(IfStringEmpty, "", junk, junk));
            assert!(eval(IfStringMatchRegex, "a", "a", junk));
            assert!(eval(IfPropertyExist, "BASE_URL", junk, junk));
        }
    }

    #[test]
    fn test_operator_names() {
        let op: ConditionOperator = serde_json::from_str("\"ifNumericGreaterOrEqual\"").unwrap();
        assert_eq!(op, ConditionOperator::IfNumericGreaterOrEqual);
        assert_eq!(op.to_string(), "ifNumericGreaterOrEqual");
        assert_eq!(op.operand_count(), 2);
    }

    #[test]
    fn test_equals_aliases() {
        for name in ["\"EQUALS\"", "\"equals\""] {
            let op: ConditionOperator = serde_json::from_str(name).unwrap();
            assert_eq!(op, ConditionOperator::IfStringEqual);
        }
        let op: ConditionOperator = serde_yaml::from_str("NOT_EQUALS").unwrap();
        assert_eq!(op, ConditionOperator::IfStringDifferent);
        // 输出始终使用规范名称
        assert_eq!(op.as_str(), "ifStringDifferent");
    }
}
