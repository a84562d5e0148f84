use std::collections::BTreeMap;

pub const MAX_METADATA_KEYS: usize = 50;
pub const MAX_METADATA_KEY_LEN: usize = 40;
pub const MAX_METADATA_VALUE_LEN: usize = 500;

pub type Metadata = BTreeMap<String, String>;

/// Trims metadata to what Stripe accepts.
///
/// Keys are cut to 40 characters and values to 500; only the first 50 distinct
/// keys (in iteration order) are kept.
pub fn clean_metadata<I, K, V>(entries: I) -> Metadata
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut clean = Metadata::new();

    for (key, value) in entries {
        let key = truncate_chars(key.as_ref(), MAX_METADATA_KEY_LEN);
        if !clean.contains_key(&key) && clean.len() >= MAX_METADATA_KEYS {
            break;
        }
        clean.insert(key, truncate_chars(value.as_ref(), MAX_METADATA_VALUE_LEN));
    }

    clean
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
