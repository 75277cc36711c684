//! Default value functions used by serde for config deserialization.

pub fn default_name() -> String {
    "Knight".to_string()
}

pub fn default_data_dir() -> String {
    "~/.knight".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_true() -> bool {
    true
}

pub fn default_provider() -> String {
    "gemini".to_string()
}

pub fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

pub fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

pub fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

/// 30 minutes.
pub fn default_max_shadow_age_ms() -> u64 {
    30 * 60 * 1000
}

/// 10 minutes.
pub fn default_sweep_interval_ms() -> u64 {
    10 * 60 * 1000
}

pub fn default_max_entries() -> usize {
    1000
}

pub fn default_download_timeout_secs() -> u64 {
    20
}

pub fn default_send_timeout_secs() -> u64 {
    20
}

pub fn default_max_history() -> usize {
    10
}

pub fn default_session_timeout_mins() -> u64 {
    30
}

pub fn default_max_messages_per_minute() -> u32 {
    50
}

pub fn default_auto_block_threshold() -> u32 {
    5
}
