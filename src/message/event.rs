//! Geospatial event payload carried by every [`Message`](super::Message).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
    pub hae: f64,
    pub ce: f64,
    pub le: f64,
}

/// Free-form detail blob. Stages append text to `xml_detail`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    #[serde(default)]
    pub xml_detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CotEvent {
    pub uid: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub how: String,
    pub time: DateTime<Utc>,
    pub start: DateTime<Utc>,
    pub stale: DateTime<Utc>,
    pub point: Point,
    #[serde(default)]
    pub detail: Detail,
}

impl CotEvent {
    /// How long a situational-awareness report stays current.
    const SA_STALE_SECS: i64 = 45;

    /// A friendly ground unit position report, stamped now, used by the
    /// periodic senders as their template.
    pub fn situational_awareness(uid: &str, callsign: &str) -> Self {
        let now = Utc::now();
        Self {
            uid: uid.to_string(),
            event_type: "a-f-G-U-C".to_string(),
            how: "m-g".to_string(),
            time: now,
            start: now,
            stale: now + Duration::seconds(Self::SA_STALE_SECS),
            point: Point {
                lat: 40.255716,
                lon: -72.045306,
                hae: -22.22983896651138,
                ce: 4.9,
                le: 9_999_999.0,
            },
            detail: Detail {
                xml_detail: format!(
                    "<contact endpoint=\"*:-1:stcp\" callsign=\"{callsign}\"/><uid Droid=\"{callsign}\"/>"
                ),
            },
        }
    }
}
