use super::filter_matcher::matches;
use super::validation::{validate_filter, validate_topic};
use super::TopicError;

// Helper: every (topic, expected) pair is checked against one filter
fn check_filter(filter: &str, cases: &[(&str, bool)]) {
	for (topic, expected) in cases {
		assert_eq!(
			matches(filter, topic),
			*expected,
			"filter '{}' against topic '{}' should be {}",
			filter,
			topic,
			expected
		);
	}
}

#[test]
fn test_exact_matches() {
	check_filter(
		"a/b",
		&[("a/b", true), ("a/c", false), ("a", false), ("a/b/c", false)],
	);
	check_filter("sensors/temperature", &[
		("sensors/temperature", true),
		("sensors/humidity", false),
		("sensors/temperature/", false),
	]);
}

#[test]
fn test_plus_wildcards() {
	check_filter("a/+/c", &[
		("a/b/c", true),
		("a/x/c", true),
		("a/b/b/c", false),
		("a/c", false),
		("a//c", false),
	]);
	check_filter("home/+", &[
		("home/kitchen", true),
		("home/kitchen/temperature", false),
		("home", false),
		("home/", false),
	]);
	check_filter("+/+", &[("a/b", true), ("a", false), ("a/b/c", false)]);
}

#[test]
fn test_hash_wildcards() {
	check_filter("#", &[
		("a/b", true),
		("a", true),
		("a/b/c/d/e", true),
		("$SYS/x", false),
		("$SYS", false),
	]);
	check_filter("a/#", &[
		("a", true),
		("a/b", true),
		("a/b/c", true),
		("b/a", false),
		("ab", false),
	]);
	check_filter("a/+/#", &[
		("a/b", true),
		("a/b/c/d", true),
		("a", false),
	]);
}

#[test]
fn test_reserved_topics() {
	// Only a leading '#' is barred from reserved topics
	check_filter("$SYS/#", &[("$SYS/broker/uptime", true), ("$SYS", true)]);
	check_filter("$SYS/+/uptime", &[("$SYS/broker/uptime", true)]);
	check_filter("#", &[("$share/group", false)]);
}

#[test]
fn test_repeated_calls_are_stable() {
	let pairs = [("a/+/c", "a/b/c"), ("#", "$SYS/x"), ("a/#", "a")];
	for (filter, topic) in pairs {
		let first = matches(filter, topic);
		for _ in 0 .. 10 {
			assert_eq!(matches(filter, topic), first);
		}
	}
}

#[test]
fn test_matches_from_many_threads() {
	let handles: Vec<_> = (0 .. 4)
		.map(|_| {
			std::thread::spawn(|| {
				(0 .. 1000).all(|_| {
					matches("a/+/c", "a/b/c") && !matches("a/+/c", "a/b/b/c")
				})
			})
		})
		.collect();
	for handle in handles {
		assert!(handle.join().unwrap());
	}
}

#[test]
fn test_validate_filter() {
	assert!(validate_filter("a/b").is_ok());
	assert!(validate_filter("a/+/c").is_ok());
	assert!(validate_filter("#").is_ok());
	assert!(validate_filter("a/#").is_ok());
	assert!(validate_filter("+").is_ok());

	assert_eq!(validate_filter(""), Err(TopicError::Empty));
	assert!(matches!(
		validate_filter("a/#/c"),
		Err(TopicError::HashPosition { .. })
	));
	assert!(matches!(
		validate_filter("a/b#"),
		Err(TopicError::HashPosition { .. })
	));
	assert!(matches!(
		validate_filter("a/b+/c"),
		Err(TopicError::PlusPosition { .. })
	));
	assert!(matches!(
		validate_filter("a/\0"),
		Err(TopicError::NullByte { .. })
	));
}

#[test]
fn test_validate_topic() {
	assert!(validate_topic("a/b").is_ok());
	assert!(validate_topic("$SYS/broker").is_ok());

	assert_eq!(validate_topic(""), Err(TopicError::Empty));
	assert!(matches!(
		validate_topic("a/+"),
		Err(TopicError::WildcardInTopic { .. })
	));
	assert!(matches!(
		validate_topic("a/#"),
		Err(TopicError::WildcardInTopic { .. })
	));

	let long = "x".repeat(super::limits::MAX_TOPIC_LENGTH + 1);
	assert!(matches!(
		validate_topic(&long),
		Err(TopicError::TooLong { .. })
	));
}
