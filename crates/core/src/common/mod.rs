pub mod time;

/// 证券代码允许的最大长度
pub const MAX_SYMBOL_LEN: usize = 12;

/// # Summary
/// 将用户输入的证券代码规整为系统内部的标准形式。
///
/// # Logic
/// 1. 去掉首尾空白并转为大写。
/// 2. 校验长度在 `1..=MAX_SYMBOL_LEN` 之间。
/// 3. 仅允许字母、数字以及 Yahoo 代码中常见的 `.`、`-`、`^`、`=`。
///
/// # Arguments
/// * `raw`: 原始输入，例如 `" aapl "`、`"brk-b"`。
///
/// # Returns
/// 合法时返回标准代码，否则返回 `None`。
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let symbol = raw.trim().to_uppercase();
    if symbol.is_empty() || symbol.len() > MAX_SYMBOL_LEN {
        return None;
    }
    let valid = symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    valid.then_some(symbol)
}
