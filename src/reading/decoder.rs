use std::str;
use serde::de::Error as _;
use serde_json::Value;

use crate::error::DecodeError;
use crate::reading::types::SensorReading;

/// A notification payload: the reading plus the optional `fall` flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedNotification {
    pub reading: SensorReading,
    pub fall: Option<bool>,
}

/// Decodes a raw notification. Either all seven zones are present and
/// string-typed, or the whole payload is rejected.
pub fn decode_notification(bytes: &[u8]) -> Result<DecodedNotification, DecodeError> {
    let text = str::from_utf8(bytes)?;
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(serde_json::Error::custom("expected a JSON object").into());
    }

    // a `fall` field that is not a boolean is treated as absent
    let fall = value.get("fall").and_then(Value::as_bool);
    let reading: SensorReading = serde_json::from_value(value)?;

    Ok(DecodedNotification { reading, fall })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_reading(bytes: &[u8]) -> Result<SensorReading, DecodeError> {
        decode_notification(bytes).map(|decoded| decoded.reading)
    }

    const PAYLOAD: &[u8] = br#"{"heel":"10","big_toe":"5","arch":"3","ball":"8","sole":"2","pitch":"1","roll":"0"}"#;

    #[test]
    fn decodes_all_zones() {
        let reading = decode_reading(PAYLOAD).unwrap();
        assert_eq!(reading, SensorReading {
            heel: "10".to_string(),
            big_toe: "5".to_string(),
            arch: "3".to_string(),
            ball: "8".to_string(),
            sole: "2".to_string(),
            pitch: "1".to_string(),
            roll: "0".to_string(),
        });
    }

    #[test]
    fn missing_zone_is_rejected() {
        let payload = br#"{"heel":"10","big_toe":"5","arch":"3","ball":"8","sole":"2","pitch":"1"}"#;
        assert!(matches!(decode_reading(payload), Err(DecodeError::InvalidField { .. })));
    }

    #[test]
    fn numeric_zone_is_rejected() {
        let payload = br#"{"heel":10,"big_toe":"5","arch":"3","ball":"8","sole":"2","pitch":"1","roll":"0"}"#;
        assert!(matches!(decode_reading(payload), Err(DecodeError::InvalidField { .. })));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(matches!(decode_reading(b"[1, 2, 3]"), Err(DecodeError::InvalidField { .. })));
        assert!(matches!(decode_reading(b"\"heel\""), Err(DecodeError::InvalidField { .. })));
        assert!(matches!(
            decode_reading(br#"["10","5","3","8","2","1","0"]"#),
            Err(DecodeError::InvalidField { .. })
        ));
    }

    #[test]
    fn extra_fields_are_ignored() {
        let payload = br#"{"heel":"10","big_toe":"5","arch":"3","ball":"8","sole":"2","pitch":"1","roll":"0","battery":"87"}"#;
        assert_eq!(decode_reading(payload).unwrap(), decode_reading(PAYLOAD).unwrap());
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        assert!(matches!(decode_reading(&[0x7b, 0xff, 0xfe, 0x7d]), Err(DecodeError::NotUtf8 { .. })));
    }

    #[test]
    fn invalid_json_is_rejected() {
        assert!(matches!(decode_reading(b"{\"heel\":"), Err(DecodeError::NotJson { .. })));
        assert!(matches!(decode_reading(b"heel=10"), Err(DecodeError::NotJson { .. })));
        assert!(matches!(decode_reading(b""), Err(DecodeError::NotJson { .. })));
    }

    #[test]
    fn decoding_is_deterministic() {
        assert_eq!(decode_reading(PAYLOAD).unwrap(), decode_reading(PAYLOAD).unwrap());

        let broken = br#"{"heel":"10"}"#;
        let first = decode_reading(broken).unwrap_err().to_string();
        let second = decode_reading(broken).unwrap_err().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn fall_flag_is_optional() {
        assert_eq!(decode_notification(PAYLOAD).unwrap().fall, None);

        let payload = br#"{"heel":"10","big_toe":"5","arch":"3","ball":"8","sole":"2","pitch":"1","roll":"0","fall":true}"#;
        assert_eq!(decode_notification(payload).unwrap().fall, Some(true));

        let payload = br#"{"heel":"10","big_toe":"5","arch":"3","ball":"8","sole":"2","pitch":"1","roll":"0","fall":"yes"}"#;
        assert_eq!(decode_notification(payload).unwrap().fall, None);
    }
}
