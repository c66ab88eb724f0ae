//! Error types and validation helpers for topics and filters

use thiserror::Error;

/// Errors produced while validating topics and subscription filters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicError {
	/// Topic or filter is the empty string
	#[error("Topic or filter cannot be empty")]
	Empty,

	/// Topic or filter exceeds the MQTT string length limit
	#[error("'{value}' is too long: {len} > {max} bytes")]
	TooLong {
		/// Offending value, truncated for display
		value: String,
		/// Actual length in bytes
		len: usize,
		/// Maximum allowed length
		max: usize,
	},

	/// NUL characters are not allowed anywhere
	#[error("'{value}' contains a null byte")]
	NullByte {
		/// Offending value
		value: String,
	},

	/// `#` used somewhere other than as the whole final level
	#[error(
		"Invalid filter '{filter}': # wildcard can only be the whole last \
		 level"
	)]
	HashPosition {
		/// Offending filter
		filter: String,
	},

	/// `+` mixed with other characters inside a level
	#[error("Invalid filter '{filter}': + wildcard must occupy a whole level")]
	PlusPosition {
		/// Offending filter
		filter: String,
	},

	/// Wildcards are only legal in subscription filters
	#[error("Topic '{topic}' contains wildcard characters ('#' or '+')")]
	WildcardInTopic {
		/// Offending topic
		topic: String,
	},
}

impl TopicError {
	pub(crate) fn too_long(value: &str) -> Self {
		Self::TooLong {
			value: value.chars().take(32).collect(),
			len: value.len(),
			max: limits::MAX_TOPIC_LENGTH,
		}
	}
}

/// Convenient Result type for topic operations
pub type TopicResult<T> = Result<T, TopicError>;

/// Topic processing limits
pub mod limits {
	/// Maximum length of a topic or filter (MQTT UTF-8 string limit)
	pub const MAX_TOPIC_LENGTH: usize = 65535;
}

/// Validation utilities for topics and filters
pub mod validation {
	use super::TopicError;
	use super::limits::MAX_TOPIC_LENGTH;

	fn validate_common(value: &str) -> Result<(), TopicError> {
		if value.is_empty() {
			return Err(TopicError::Empty);
		}
		if value.len() > MAX_TOPIC_LENGTH {
			return Err(TopicError::too_long(value));
		}
		if value.contains('\0') {
			return Err(TopicError::NullByte {
				value: value.to_string(),
			});
		}
		Ok(())
	}

	/// Validates a subscription filter.
	///
	/// `+` must be a whole level; `#` must be the whole last level.
	pub fn validate_filter(filter: &str) -> Result<(), TopicError> {
		validate_common(filter)?;
		let mut levels = filter.split('/').peekable();
		while let Some(level) = levels.next() {
			let is_last = levels.peek().is_none();
			if level.contains('#') && (level != "#" || !is_last) {
				return Err(TopicError::HashPosition {
					filter: filter.to_string(),
				});
			}
			if level.contains('+') && level != "+" {
				return Err(TopicError::PlusPosition {
					filter: filter.to_string(),
				});
			}
		}
		Ok(())
	}

	/// Validates a concrete topic used for publishing.
	pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
		validate_common(topic)?;
		if topic.chars().any(|c| matches!(c, '#' | '+')) {
			return Err(TopicError::WildcardInTopic {
				topic: topic.to_string(),
			});
		}
		Ok(())
	}
}
