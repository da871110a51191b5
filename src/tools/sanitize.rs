//! 地名 / 作物名等自由文本字段的校验
//!
//! 仅允许字母（含各文种字母与组合附加符号，如天城文的元音符号）、空格与少量标点，
//! 长度 1..=64 个字符，首字符必须是字母。数字、尖括号、斜杠、引号外的符号一律拒绝。

use std::sync::OnceLock;

use regex::Regex;

static NAME_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn name_re() -> Result<&'static Regex, String> {
    NAME_RE
        .get_or_init(|| Regex::new(r"^[\p{L}\p{M}][\p{L}\p{M} .,'()-]{0,63}$"))
        .as_ref()
        .map_err(|e| format!("invalid name pattern: {e}"))
}

/// 压缩连续空白并去掉首尾空白
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 校验地名、害虫名等；返回规整后的值
pub fn sanitize_name(field: &str, value: &str) -> Result<String, String> {
    let normalized = normalize_whitespace(value);
    if normalized.is_empty() {
        return Err(format!("`{field}` must not be empty"));
    }
    if !name_re()?.is_match(&normalized) {
        return Err(format!(
            "`{field}` contains unsupported characters or is too long: {:?}",
            normalized.chars().take(80).collect::<String>()
        ));
    }
    Ok(normalized)
}

/// 作物 / 商品名：同 sanitize_name，并转为小写（查表与外部接口都按小写匹配）
pub fn sanitize_crop(field: &str, value: &str) -> Result<String, String> {
    sanitize_name(field, value).map(|v| v.to_lowercase())
}

/// 可选字段：None 或空白视为未提供
pub fn sanitize_optional(
    field: &str,
    value: Option<&str>,
    f: fn(&str, &str) -> Result<String, String>,
) -> Result<Option<String>, String> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => f(field, v).map(Some),
        None => Ok(None),
    }
}
