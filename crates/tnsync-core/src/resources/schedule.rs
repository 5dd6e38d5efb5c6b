// Cron-style schedules shared by the periodic task reconcilers.

use serde_json::{Map, Value, json};

use crate::error::CoreError;

/// The schedule fields a task spec sets. Unset fields are left to the
/// daemon's defaults on create and untouched on update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    pub minute: Option<String>,
    pub hour: Option<String>,
    pub dom: Option<String>,
    pub month: Option<String>,
    pub dow: Option<String>,
    /// Window start, `HH:MM`.
    pub begin: Option<String>,
    pub end: Option<String>,
}

impl Schedule {
    fn fields(&self) -> [(&'static str, Option<&String>); 7] {
        [
            ("minute", self.minute.as_ref()),
            ("hour", self.hour.as_ref()),
            ("dom", self.dom.as_ref()),
            ("month", self.month.as_ref()),
            ("dow", self.dow.as_ref()),
            ("begin", self.begin.as_ref()),
            ("end", self.end.as_ref()),
        ]
    }

    /// Every set field, for a create payload. `None` when nothing is set.
    pub fn payload(&self) -> Option<Value> {
        let map: Map<String, Value> = self
            .fields()
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k.to_owned(), json!(v))))
            .collect();
        (!map.is_empty()).then_some(Value::Object(map))
    }

    /// Set fields that differ from the observed `schedule` object.
    pub fn changes(&self, observed: &Value) -> Option<Value> {
        let map: Map<String, Value> = self
            .fields()
            .into_iter()
            .filter_map(|(k, v)| {
                let v = v?;
                let have = observed.get(k).and_then(Value::as_str);
                (have != Some(v.as_str())).then(|| (k.to_owned(), json!(v)))
            })
            .collect();
        (!map.is_empty()).then_some(Value::Object(map))
    }
}

/// Normalize `H:MM` / `HH:MM` to `HH:MM`.
pub fn clock_time(field: &str, raw: &str) -> Result<String, CoreError> {
    let raw = raw.trim();
    let bad = || CoreError::validation(format!("{field} {raw:?} should be of the form HH:MM"));
    let (hours, minutes) = raw.split_once(':').ok_or_else(bad)?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(hours) || hours.len() > 2 || !digits(minutes) || minutes.len() != 2 {
        return Err(bad());
    }
    Ok(format!("{hours:0>2}:{minutes}"))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_differing_fields() {
        let schedule = Schedule {
            hour: Some("3".into()),
            dow: Some("7".into()),
            ..Schedule::default()
        };
        let observed = json!({"minute": "00", "hour": "3", "dom": "*", "month": "*", "dow": "1"});
        assert_eq!(schedule.changes(&observed), Some(json!({"dow": "7"})));
        assert_eq!(Schedule::default().payload(), None);
    }

    #[test]
    fn clock_times() {
        assert_eq!(clock_time("begin", " 9:00 ").ok().as_deref(), Some("09:00"));
        assert_eq!(clock_time("begin", "23:59").ok().as_deref(), Some("23:59"));
        assert!(clock_time("end", "9").is_err());
        assert!(clock_time("end", "123:00").is_err());
        assert!(clock_time("end", "9:5").is_err());
    }
}
