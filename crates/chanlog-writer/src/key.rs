//! Store keys of channel-log documents

/// Prefix shared by every document this crate writes
pub const KEY_PREFIX: &str = "_sync";

/// Format tag of the stored log encoding.
///
/// Bump whenever the record layout changes, so logs in the old and new
/// formats never share a key.
pub const CHANNEL_LOG_DOC_TYPE: &str = "log2";

/// Document key holding `channel_name`'s log
pub fn channel_log_key(channel_name: &str) -> String {
    format!("{}:{}:{}", KEY_PREFIX, CHANNEL_LOG_DOC_TYPE, channel_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_log_key() {
        assert_eq!(channel_log_key("news"), "_sync:log2:news");
        assert_eq!(channel_log_key("*"), "_sync:log2:*");
    }

    #[test]
    fn test_channel_names_are_not_escaped() {
        // Colons in a channel name stay distinct from the prefix fields
        assert_eq!(channel_log_key("a:b"), "_sync:log2:a:b");
        assert_ne!(channel_log_key("a:b"), channel_log_key("a"));
    }
}
