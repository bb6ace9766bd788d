/*!
 * Serde helpers shared by the report and statistics types.
 */

/// Serialize a [`std::time::Duration`] as whole milliseconds.
///
/// ```rust
/// use serde::Serialize;
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct Timing {
///     #[serde(with = "scripthost_core::utils::serde::duration_ms")]
///     elapsed: Duration,
/// }
///
/// let json = serde_json::to_string(&Timing { elapsed: Duration::from_millis(1500) }).unwrap();
/// assert_eq!(json, r#"{"elapsed":1500}"#);
/// ```
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timed {
        #[serde(with = "super::duration_ms")]
        elapsed: Duration,
    }

    #[test]
    fn test_duration_ms_round_trip() {
        let json = serde_json::to_string(&Timed { elapsed: Duration::from_millis(250) }).unwrap();
        assert_eq!(json, r#"{"elapsed":250}"#);
        let back: Timed = serde_json::from_str(&json).unwrap();
        assert_eq!(back.elapsed, Duration::from_millis(250));
    }
}
