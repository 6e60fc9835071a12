//! String formatting utilities.

/// Shortens an identifier for log output: the first 8 characters followed by
/// `..` for anything longer.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((idx, _)) => format!("{}..", &id[..idx]),
		None => id.to_string(),
	}
}
