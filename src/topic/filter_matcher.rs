//! Filter-to-topic matching

/// Returns `true` if `topic` belongs to the subscription `filter`.
///
/// Levels are compared left to right:
/// - `#` matches the rest of the topic, including nothing at all, so
///   `a/#` also matches `a`;
/// - `+` matches exactly one non-empty level;
/// - any other level must be equal.
///
/// A filter starting with `#` never matches a reserved topic (first level
/// beginning with `$`).
///
/// ```
/// use mqtt_multiplexer::topic::matches;
///
/// assert!(matches("sensors/+/temperature", "sensors/kitchen/temperature"));
/// assert!(matches("sensors/#", "sensors"));
/// assert!(!matches("#", "$SYS/uptime"));
/// ```
pub fn matches(filter: &str, topic: &str) -> bool {
	let mut filter_levels = filter.split('/');
	let mut topic_levels = topic.split('/');

	if filter_levels.clone().next() == Some("#") && topic.starts_with('$') {
		return false;
	}

	loop {
		match (filter_levels.next(), topic_levels.next()) {
			| (Some("#"), _) => return true,
			| (Some("+"), Some(level)) if !level.is_empty() => {}
			| (Some("+"), _) => return false,
			| (Some(expected), Some(level)) if expected == level => {}
			| (None, None) => return true,
			| _ => return false,
		}
	}
}
