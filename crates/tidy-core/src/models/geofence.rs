//! Geofence model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::geo::GeoPoint;

/// A unique identifier for a geofence, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeofenceId(Uuid);

impl GeofenceId {
    /// Create a new unique geofence ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for GeofenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GeofenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GeofenceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Which containment transitions fire a geofence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    #[default]
    Enter,
    Exit,
    Both,
}

impl TriggerType {
    /// Whether a transition in the given direction should fire.
    pub const fn fires_on(self, entering: bool) -> bool {
        match self {
            Self::Enter => entering,
            Self::Exit => !entering,
            Self::Both => true,
        }
    }
}

impl FromStr for TriggerType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enter" => Ok(Self::Enter),
            "exit" => Ok(Self::Exit),
            "both" => Ok(Self::Both),
            other => Err(Error::InvalidInput(format!(
                "unknown trigger type '{other}' (expected enter, exit or both)"
            ))),
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter => f.write_str("enter"),
            Self::Exit => f.write_str("exit"),
            Self::Both => f.write_str("both"),
        }
    }
}

/// A circular region that fires on enter and/or exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub id: GeofenceId,
    pub name: String,
    /// Text shown when entering; exits use a generated message
    #[serde(default)]
    pub message: String,
    pub center: GeoPoint,
    pub radius_meters: f64,
    #[serde(default)]
    pub trigger_type: TriggerType,
    pub active: bool,
    /// Last observed containment, the edge detector state
    #[serde(default)]
    pub triggered: bool,
    /// Whether `triggered` came from an observed position
    #[serde(default)]
    pub state_known: bool,
    /// Maximum number of fires, 0 means unlimited
    #[serde(default)]
    pub repeat_limit: u32,
    #[serde(default)]
    pub fire_count: u32,
    #[serde(default)]
    pub last_fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Geofence {
    /// Whether the repeat limit stops any further fire.
    pub const fn limit_reached(&self) -> bool {
        self.repeat_limit > 0 && self.fire_count >= self.repeat_limit
    }

    /// Structural validation used for drafts and imports.
    pub fn validate(&self) -> Result<()> {
        validate_region(self.center, self.radius_meters)
    }

    /// Message for a transition in the given direction.
    pub fn message_for(&self, entering: bool) -> String {
        if entering {
            if self.message.trim().is_empty() {
                format!("You entered the area \"{}\"", self.name)
            } else {
                self.message.clone()
            }
        } else {
            format!("You left the area \"{}\"", self.name)
        }
    }
}

/// Fields accepted when creating a geofence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    pub center: GeoPoint,
    #[serde(default = "default_radius")]
    pub radius_meters: f64,
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub repeat_limit: u32,
}

const fn default_radius() -> f64 {
    100.0
}

impl GeofenceDraft {
    pub fn new(center: GeoPoint, radius_meters: f64, trigger_type: TriggerType) -> Self {
        Self {
            name: String::new(),
            message: String::new(),
            center,
            radius_meters,
            trigger_type,
            repeat_limit: 0,
        }
    }

    /// Validate and turn the draft into an active geofence.
    pub fn into_geofence(self, now: DateTime<Utc>) -> Result<Geofence> {
        validate_region(self.center, self.radius_meters)?;
        let name = if self.name.trim().is_empty() {
            "Unnamed geofence".to_string()
        } else {
            self.name.trim().to_string()
        };

        Ok(Geofence {
            id: GeofenceId::new(),
            name,
            message: self.message.trim().to_string(),
            center: self.center,
            radius_meters: self.radius_meters,
            trigger_type: self.trigger_type,
            active: true,
            triggered: false,
            state_known: false,
            repeat_limit: self.repeat_limit,
            fire_count: 0,
            last_fired_at: None,
            created_at: now,
        })
    }
}

/// Partial update of a geofence; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeofencePatch {
    pub name: Option<String>,
    pub message: Option<String>,
    pub center: Option<GeoPoint>,
    pub radius_meters: Option<f64>,
    pub trigger_type: Option<TriggerType>,
    pub active: Option<bool>,
    pub repeat_limit: Option<u32>,
}

impl GeofencePatch {
    /// Apply the patch, validating the resulting region.
    ///
    /// Moving, resizing or reactivating the region forgets the containment
    /// state so the next position re-seeds it without firing.
    pub fn apply(self, geofence: &mut Geofence) -> Result<()> {
        let center = self.center.unwrap_or(geofence.center);
        let radius = self.radius_meters.unwrap_or(geofence.radius_meters);
        validate_region(center, radius)?;

        let region_changed = center != geofence.center
            || (radius - geofence.radius_meters).abs() > f64::EPSILON;
        let reactivated = self.active == Some(true) && !geofence.active;

        if let Some(name) = self.name {
            geofence.name = name.trim().to_string();
        }
        if let Some(message) = self.message {
            geofence.message = message.trim().to_string();
        }
        if let Some(trigger_type) = self.trigger_type {
            geofence.trigger_type = trigger_type;
        }
        if let Some(active) = self.active {
            geofence.active = active;
        }
        if let Some(repeat_limit) = self.repeat_limit {
            geofence.repeat_limit = repeat_limit;
            if repeat_limit > 0 && geofence.fire_count > repeat_limit {
                geofence.fire_count = repeat_limit;
            }
        }
        geofence.center = center;
        geofence.radius_meters = radius;
        if region_changed || reactivated {
            geofence.triggered = false;
            geofence.state_known = false;
        }
        Ok(())
    }
}

fn validate_region(center: GeoPoint, radius_meters: f64) -> Result<()> {
    if !center.is_valid() {
        return Err(Error::InvalidInput(format!(
            "invalid coordinates ({}, {})",
            center.latitude, center.longitude
        )));
    }
    if !radius_meters.is_finite() || radius_meters <= 0.0 {
        return Err(Error::InvalidInput(format!(
            "radius must be greater than zero, got {radius_meters}"
        )));
    }
    Ok(())
}

/// A position sample from the platform geolocation facility
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy radius in meters
    #[serde(default)]
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(point: GeoPoint, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            accuracy: None,
            timestamp,
        }
    }

    pub const fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}
