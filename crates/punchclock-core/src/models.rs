//! Data models for Punchclock
//!
//! Defines the entities the sync engine moves between device and server:
//! users, sites, assignments and shifts. Every queued mutation carries one of
//! them inside a [`SyncEntity`], so the entity type is always known from the
//! variant rather than from a free-form string.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mean earth radius used for geofence distances
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Errors raised while building entities from untyped input
#[derive(Error, Debug)]
pub enum EntityError {
    #[error("Unknown entity type '{0}' (expected user, site, assignment or shift)")]
    UnknownEntityType(String),

    #[error("Unknown operation kind '{0}' (expected create, update or delete)")]
    UnknownKind(String),

    #[error("Invalid {entity_type} payload: {source}")]
    InvalidPayload {
        entity_type: EntityType,
        #[source]
        source: serde_json::Error,
    },
}

/// The kinds of entity the remote API accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
    Site,
    Assignment,
    Shift,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::User,
        EntityType::Site,
        EntityType::Assignment,
        EntityType::Shift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Site => "site",
            EntityType::Assignment => "assignment",
            EntityType::Shift => "shift",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(EntityType::User),
            "site" => Ok(EntityType::Site),
            "assignment" => Ok(EntityType::Assignment),
            "shift" => Ok(EntityType::Shift),
            other => Err(EntityError::UnknownEntityType(other.to_string())),
        }
    }
}

/// What a queued operation does to its entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = EntityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(EntityError::UnknownKind(other.to_string())),
        }
    }
}

/// A GPS fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy radius in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
        }
    }

    /// Great-circle distance in meters (haversine)
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Role of a user within the organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Worker,
    Supervisor,
    Admin,
}

/// A person who works shifts or administers them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default = "default_true")]
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: None,
            role: UserRole::Worker,
            active: true,
            updated_at: Utc::now(),
        }
    }
}

/// A work location with a circular geofence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub location: GeoPoint,
    /// Geofence radius in meters
    pub radius_m: f64,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    pub fn new(id: impl Into<String>, name: impl Into<String>, location: GeoPoint, radius_m: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: None,
            location,
            radius_m,
            updated_at: Utc::now(),
        }
    }

    /// Check whether a GPS fix falls inside the site's geofence
    ///
    /// The fix's reported accuracy is added to the radius so a noisy but
    /// plausible fix at the boundary is still accepted.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let slack = point.accuracy_m.unwrap_or(0.0).max(0.0);
        self.location.distance_to(point) <= self.radius_m + slack
    }
}

/// A user scheduled to work at a site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub user_id: String,
    pub site_id: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        site_id: impl Into<String>,
        starts_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            site_id: site_id.into(),
            starts_at,
            ends_at: None,
            notes: None,
            updated_at: Utc::now(),
        }
    }
}

/// Lifecycle of a work shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

/// Where and when a worker checked in or out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPoint {
    pub at: DateTime<Utc>,
    pub location: GeoPoint,
}

/// A work shift, checked in and out with GPS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: String,
    pub user_id: String,
    pub site_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub status: ShiftStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<CheckPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<CheckPoint>,
    /// Set when this device acknowledged a server-initiated shift start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Shift {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, site_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            site_id: site_id.into(),
            assignment_id: None,
            status: ShiftStatus::Scheduled,
            check_in: None,
            check_out: None,
            acknowledged_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Record a check-in and move the shift to in-progress
    pub fn check_in(&mut self, location: GeoPoint, at: DateTime<Utc>) {
        self.check_in = Some(CheckPoint { at, location });
        self.status = ShiftStatus::InProgress;
        self.updated_at = at;
    }

    /// Record a check-out and complete the shift
    pub fn check_out(&mut self, location: GeoPoint, at: DateTime<Utc>) {
        self.check_out = Some(CheckPoint { at, location });
        self.status = ShiftStatus::Completed;
        self.updated_at = at;
    }

    /// Mark a server-initiated start as seen by this device
    pub fn acknowledge(&mut self, at: DateTime<Utc>) {
        self.acknowledged_at = Some(at);
        if self.status == ShiftStatus::Scheduled {
            self.status = ShiftStatus::InProgress;
        }
        self.updated_at = at;
    }

    /// Worked time, if both ends are recorded
    pub fn worked(&self) -> Option<chrono::Duration> {
        match (&self.check_in, &self.check_out) {
            (Some(start), Some(end)) if end.at >= start.at => Some(end.at - start.at),
            _ => None,
        }
    }
}

/// An entity snapshot carried by a sync operation
///
/// Serialized adjacently tagged: `{"entityType": "shift", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entityType", content = "payload", rename_all = "lowercase")]
pub enum SyncEntity {
    User(User),
    Site(Site),
    Assignment(Assignment),
    Shift(Shift),
}

impl SyncEntity {
    /// Build an entity from a type tag and raw JSON payload
    pub fn from_json(entity_type: EntityType, payload: serde_json::Value) -> Result<Self, EntityError> {
        let invalid = |source| EntityError::InvalidPayload {
            entity_type,
            source,
        };
        Ok(match entity_type {
            EntityType::User => SyncEntity::User(serde_json::from_value(payload).map_err(invalid)?),
            EntityType::Site => SyncEntity::Site(serde_json::from_value(payload).map_err(invalid)?),
            EntityType::Assignment => {
                SyncEntity::Assignment(serde_json::from_value(payload).map_err(invalid)?)
            }
            EntityType::Shift => SyncEntity::Shift(serde_json::from_value(payload).map_err(invalid)?),
        })
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            SyncEntity::User(_) => EntityType::User,
            SyncEntity::Site(_) => EntityType::Site,
            SyncEntity::Assignment(_) => EntityType::Assignment,
            SyncEntity::Shift(_) => EntityType::Shift,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            SyncEntity::User(u) => &u.id,
            SyncEntity::Site(s) => &s.id,
            SyncEntity::Assignment(a) => &a.id,
            SyncEntity::Shift(s) => &s.id,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            SyncEntity::User(u) => u.updated_at,
            SyncEntity::Site(s) => s.updated_at,
            SyncEntity::Assignment(a) => a.updated_at,
            SyncEntity::Shift(s) => s.updated_at,
        }
    }

    /// The inner payload as JSON, without the type tag
    pub fn payload_json(&self) -> serde_json::Value {
        let value = match self {
            SyncEntity::User(u) => serde_json::to_value(u),
            SyncEntity::Site(s) => serde_json::to_value(s),
            SyncEntity::Assignment(a) => serde_json::to_value(a),
            SyncEntity::Shift(s) => serde_json::to_value(s),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("shift".parse::<EntityType>().unwrap(), EntityType::Shift);
        assert_eq!(" User ".parse::<EntityType>().unwrap(), EntityType::User);
        assert!(matches!(
            "timesheet".parse::<EntityType>(),
            Err(EntityError::UnknownEntityType(_))
        ));
    }

    #[test]
    fn test_operation_kind_parse() {
        assert_eq!("update".parse::<OperationKind>().unwrap(), OperationKind::Update);
        assert!("upsert".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_sync_entity_wire_shape() {
        let shift = Shift::new("shift-1", "user-1", "site-1");
        let entity = SyncEntity::Shift(shift);

        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["entityType"], "shift");
        assert_eq!(json["payload"]["id"], "shift-1");
        assert_eq!(json["payload"]["userId"], "user-1");
        assert_eq!(json["payload"]["status"], "scheduled");
    }

    #[test]
    fn test_sync_entity_from_json() {
        let payload = serde_json::json!({
            "id": "site-9",
            "name": "Warehouse",
            "location": { "latitude": 52.52, "longitude": 13.405 },
            "radiusM": 150.0,
            "updatedAt": "2026-01-05T08:00:00Z"
        });

        let entity = SyncEntity::from_json(EntityType::Site, payload).unwrap();
        assert_eq!(entity.entity_type(), EntityType::Site);
        assert_eq!(entity.entity_id(), "site-9");
    }

    #[test]
    fn test_sync_entity_from_json_rejects_wrong_shape() {
        let payload = serde_json::json!({ "id": "shift-1" });
        let err = SyncEntity::from_json(EntityType::Shift, payload).unwrap_err();
        assert!(err.to_string().contains("shift payload"));
    }

    #[test]
    fn test_geofence() {
        let site = Site::new("site-1", "Depot", GeoPoint::new(52.5200, 13.4050), 100.0);

        // ~55m north
        assert!(site.contains(&GeoPoint::new(52.5205, 13.4050)));
        // ~1.1km north
        assert!(!site.contains(&GeoPoint::new(52.5300, 13.4050)));

        // Accuracy slack lets a borderline fix through
        let mut fuzzy = GeoPoint::new(52.5210, 13.4050);
        assert!(!site.contains(&fuzzy));
        fuzzy.accuracy_m = Some(30.0);
        assert!(site.contains(&fuzzy));
    }

    #[test]
    fn test_shift_check_in_out() {
        let mut shift = Shift::new("shift-1", "user-1", "site-1");
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 2, 16, 30, 0).unwrap();

        shift.check_in(GeoPoint::new(0.0, 0.0), start);
        assert_eq!(shift.status, ShiftStatus::InProgress);
        assert!(shift.worked().is_none());

        shift.check_out(GeoPoint::new(0.0, 0.0), end);
        assert_eq!(shift.status, ShiftStatus::Completed);
        assert_eq!(shift.worked(), Some(chrono::Duration::minutes(510)));
    }

    #[test]
    fn test_acknowledge_starts_scheduled_shift() {
        let mut shift = Shift::new("shift-1", "user-1", "site-1");
        shift.acknowledge(Utc::now());
        assert_eq!(shift.status, ShiftStatus::InProgress);
        assert!(shift.acknowledged_at.is_some());
    }
}
