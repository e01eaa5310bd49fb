//! Unified log format: [untether][component] key=value ... . Mirrors the teacher's
//! `im/log.rs` prefix convention, generalized beyond the IM layer.

const CONTENT_LOG_MAX_LEN: usize = 120;

#[inline]
pub fn prefix(component: &str) -> String {
    format!("[untether][{}]", component)
}

/// Truncate message content for logging (avoid huge dumps of tool input / assistant text).
#[inline]
pub fn truncate_content(content: &str, max_len: usize) -> std::borrow::Cow<'_, str> {
    if content.len() <= max_len {
        std::borrow::Cow::Borrowed(content)
    } else {
        std::borrow::Cow::Owned(format!("{}... ({} bytes)", &content[..max_len], content.len()))
    }
}

#[inline]
pub fn truncate_content_default(content: &str) -> std::borrow::Cow<'_, str> {
    truncate_content(content, CONTENT_LOG_MAX_LEN)
}
