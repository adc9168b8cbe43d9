use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Telemetry payload published for every parsed sensor reading.
#[derive(Debug, Serialize)]
pub(crate) struct TelemetryMsg {
    pub(crate) soil_moisture: i64,
}

/// A validated relay directive decoded from an inbound command message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelayCommand {
    On,
    Off,
}

#[derive(Debug, Error)]
pub(crate) enum CommandError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("missing field 'relay_on'")]
    MissingField,
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Decode an inbound command payload (`{"relay_on": <bool>}`) into a
/// [`RelayCommand`].
///
/// Non-boolean `relay_on` values are accepted and judged by truthiness, so
/// sloppy publishers sending `1`/`0` or `"on"`/`""` still work.
pub(crate) fn parse_relay_command(payload: &[u8]) -> Result<RelayCommand, CommandError> {
    let value: Value = serde_json::from_slice(payload)?;
    match value.get("relay_on") {
        Some(v) if is_truthy(v) => Ok(RelayCommand::On),
        Some(_) => Ok(RelayCommand::Off),
        None => Err(CommandError::MissingField),
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- parse_relay_command ------------------------------------------------

    #[test]
    fn relay_on_true() {
        assert_eq!(
            parse_relay_command(br#"{"relay_on": true}"#).unwrap(),
            RelayCommand::On
        );
    }

    #[test]
    fn relay_on_false() {
        assert_eq!(
            parse_relay_command(br#"{"relay_on": false}"#).unwrap(),
            RelayCommand::Off
        );
    }

    #[test]
    fn not_json_is_malformed() {
        assert!(matches!(
            parse_relay_command(b"not json"),
            Err(CommandError::MalformedPayload(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_malformed() {
        assert!(matches!(
            parse_relay_command(&[0xff, 0xfe, 0x80]),
            Err(CommandError::MalformedPayload(_))
        ));
    }

    #[test]
    fn empty_object_is_missing_field() {
        assert!(matches!(
            parse_relay_command(b"{}"),
            Err(CommandError::MissingField)
        ));
    }

    #[test]
    fn unrelated_fields_are_missing_field() {
        assert!(matches!(
            parse_relay_command(br#"{"pump_on": true}"#),
            Err(CommandError::MissingField)
        ));
    }

    #[test]
    fn extra_fields_ignored() {
        assert_eq!(
            parse_relay_command(br#"{"relay_on": true, "extra": 1}"#).unwrap(),
            RelayCommand::On
        );
    }

    // -- truthiness of non-boolean values ------------------------------------

    #[test]
    fn nonzero_number_is_on() {
        assert_eq!(
            parse_relay_command(br#"{"relay_on": 1}"#).unwrap(),
            RelayCommand::On
        );
    }

    #[test]
    fn zero_is_off() {
        assert_eq!(
            parse_relay_command(br#"{"relay_on": 0}"#).unwrap(),
            RelayCommand::Off
        );
    }

    #[test]
    fn nonempty_string_is_on() {
        assert_eq!(
            parse_relay_command(br#"{"relay_on": "yes"}"#).unwrap(),
            RelayCommand::On
        );
    }

    #[test]
    fn empty_string_is_off() {
        assert_eq!(
            parse_relay_command(br#"{"relay_on": ""}"#).unwrap(),
            RelayCommand::Off
        );
    }

    #[test]
    fn null_is_off() {
        assert_eq!(
            parse_relay_command(br#"{"relay_on": null}"#).unwrap(),
            RelayCommand::Off
        );
    }

    // -- TelemetryMsg serialization ------------------------------------------

    #[test]
    fn telemetry_msg_serializes_to_expected_shape() {
        let json = serde_json::to_value(TelemetryMsg { soil_moisture: 523 }).unwrap();
        assert_eq!(json["soil_moisture"], 523);
        assert_eq!(json.as_object().unwrap().len(), 1);
    }
}
