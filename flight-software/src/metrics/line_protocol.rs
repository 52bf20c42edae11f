//! InfluxDB line protocol encoding.
//!
//! `measurement,tag=value field=1.5,other=2 1700000000000000000`

use chrono::{DateTime, Utc};

use super::{MetricsError, MetricsResult};

fn escape(text: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn escape_measurement(name: &str) -> String {
    escape(name, &[',', ' '])
}

/// Tag keys, tag values and field keys share the same escaping rules.
fn escape_key(key: &str) -> String {
    escape(key, &[',', '=', ' '])
}

/// Encode one point.
///
/// Non-finite field values are skipped since the protocol cannot carry them.
/// The timestamp is written in nanoseconds; it is omitted when out of range,
/// letting the server assign one.
pub fn encode_point(
    measurement: &str,
    tags: &[(&str, &str)],
    fields: &[(&str, f64)],
    timestamp: DateTime<Utc>,
) -> MetricsResult<String> {
    let field_set: Vec<String> = fields
        .iter()
        .filter(|(_, value)| value.is_finite())
        .map(|(key, value)| format!("{}={}", escape_key(key), value))
        .collect();
    if field_set.is_empty() {
        return Err(MetricsError::EmptySample);
    }

    let mut line = escape_measurement(measurement);
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_key(key));
        line.push('=');
        line.push_str(&escape_key(value));
    }
    line.push(' ');
    line.push_str(&field_set.join(","));

    if let Some(nanos) = timestamp.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&nanos.to_string());
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_epoch_plus(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn test_encode_point() {
        let line = encode_point(
            "environment",
            &[("clientId", "drone")],
            &[("x", 1.5), ("y", -2.0)],
            at_epoch_plus(1),
        )
        .unwrap();
        assert_eq!(line, "environment,clientId=drone x=1.5,y=-2 1000000000");
    }

    #[test]
    fn test_non_finite_fields_are_skipped() {
        let line = encode_point(
            "m",
            &[],
            &[("a", f64::NAN), ("b", 3.0), ("c", f64::INFINITY)],
            at_epoch_plus(0),
        )
        .unwrap();
        assert_eq!(line, "m b=3 0");
    }

    #[test]
    fn test_all_fields_invalid() {
        let result = encode_point("m", &[], &[("a", f64::NAN)], at_epoch_plus(0));
        assert!(matches!(result, Err(MetricsError::EmptySample)));
    }

    #[test]
    fn test_escaping() {
        let line = encode_point(
            "my measurement",
            &[("site name", "north,field=2")],
            &[("air temp", 1.0)],
            at_epoch_plus(0),
        )
        .unwrap();
        assert_eq!(
            line,
            r"my\ measurement,site\ name=north\,field\=2 air\ temp=1 0"
        );
    }
}
