use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// An anonymous visitor chatting through the embedded widget.
///
/// Guests are immutable after creation: a returning visitor reattaches to the
/// same guest through the thread secret stored in their browser, never by
/// re-identifying the person.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Guest {
    /// Unique identifier for the guest.
    pub id: Uuid,

    /// Display name the visitor entered, if any.
    pub name: Option<String>,

    /// Email the visitor entered, if any.
    pub email: Option<String>,

    /// Remote address observed on first contact.
    pub ip: Option<String>,

    /// Geolocation reported by the widget on first contact.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    /// When the guest first contacted the site.
    pub created: DateTime<Utc>,
}

/// Profile fields the widget sends when a guest first opens a thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct GuestProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_serialization_round_trips() {
        let guest = Guest {
            id: Uuid::new_v4(),
            name: Some("Ada".into()),
            email: None,
            ip: Some("203.0.113.7".into()),
            latitude: Some(52.52),
            longitude: Some(13.405),
            created: Utc::now(),
        };

        let json = serde_json::to_string(&guest).unwrap();
        let back: Guest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, guest);
    }

    #[test]
    fn empty_profile_serializes_without_nulls() {
        let json = serde_json::to_string(&GuestProfile::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
