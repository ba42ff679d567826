use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut truncated = String::new();
    for ch in text.chars() {
        if truncated.len() + ch.len_utf8() > max_bytes {
            break;
        }
        truncated.push(ch);
    }
    truncated
}

/// Last `max_bytes` of `text`, cut on a char boundary.
pub fn tail_string(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

pub fn now_epoch_ms() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Reduce an uploaded file name to a safe single path component.
///
/// Directory parts are dropped, runs of unsafe characters collapse to `_`,
/// and leading dots are stripped so the result is never hidden or relative.
/// Returns `None` when nothing usable remains.
pub fn sanitize_filename(name: &str) -> Option<String> {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]+").expect("valid regex"));

    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let base = base.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = unsafe_chars.replace_all(&base, "_");
    let cleaned = cleaned.trim_start_matches(['.', '_']).trim_end_matches('_');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_string("héllo", 2), "h");
        assert_eq!(truncate_string("short", 10), "short");
    }

    #[test]
    fn tail_keeps_suffix() {
        assert_eq!(tail_string("abcdef", 3), "def");
        assert_eq!(tail_string("abc", 10), "abc");
        assert_eq!(tail_string("aé", 1), "");
    }

    #[test]
    fn sanitize_filename_cases() {
        assert_eq!(sanitize_filename("IEC 62304 plan.pdf").as_deref(), Some("IEC_62304_plan.pdf"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("C:\\docs\\risk.xlsx").as_deref(), Some("risk.xlsx"));
        assert_eq!(sanitize_filename(".hidden").as_deref(), Some("hidden"));
        assert_eq!(sanitize_filename("réq*.txt").as_deref(), Some("r_q_.txt"));
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename(""), None);
    }
}
