pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";
pub const MAX_INFERRED_TITLE_CHARS: usize = 50;

pub fn is_placeholder_title(title: &str) -> bool {
    title.trim().to_lowercase() == DEFAULT_CONVERSATION_TITLE.to_lowercase()
}

/// Title derived from the first reply, or `None` when the current title must stay.
pub fn infer_title(current_title: &str, reply: &str) -> Option<String> {
    if !is_placeholder_title(current_title) {
        return None;
    }

    let collapsed = reply.split_whitespace().collect::<Vec<_>>().join(" ");
    let title: String = collapsed.chars().take(MAX_INFERRED_TITLE_CHARS).collect();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[cfg(test)]
#[path = "tests/title_tests.rs"]
mod tests;
