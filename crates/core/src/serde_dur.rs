//! Human-readable `Duration` (de)serialization for config TTL/rate-limit
//! overrides, e.g. `"7d"`, `"90d"`, `"12h"`. Config files read far better
//! this way than as a bare integer of seconds.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(dur: &Duration, ser: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	ser.serialize_str(&durationfmt::to_string(*dur))
}

pub fn deserialize<'de, D>(de: D) -> Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = String::deserialize(de)?;
	parse(&raw).map_err(serde::de::Error::custom)
}

pub fn parse(raw: &str) -> Result<Duration, String> {
	go_parse_duration::parse_duration(raw)
		.map(|nanos| Duration::from_nanos(nanos.max(0) as u64))
		.map_err(|e| format!("invalid duration {raw:?}: {e:?}"))
}

/// Same contract as [`serialize`]/[`deserialize`] but for `Option<Duration>`,
/// matching the shape config structs need for optional TTL overrides.
pub mod option {
	use super::*;

	pub fn serialize<S>(dur: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match dur {
			Some(d) => ser.serialize_some(&durationfmt::to_string(*d)),
			None => ser.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(de: D) -> Result<Option<Duration>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw: Option<String> = Option::deserialize(de)?;
		raw.map(|s| super::parse(&s).map_err(serde::de::Error::custom))
			.transpose()
	}
}
