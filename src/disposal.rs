//! Disposal points and proximity search.
//!
//! The point set is static reference data. Distances are recomputed against
//! the user's position on every query and never stored.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Radius used when the caller does not pick one.
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 10.0;

/// Fallback position when geolocation is unavailable (central Hanoi).
pub const DEFAULT_LOCATION: GeoPoint = GeoPoint {
    latitude: 21.02,
    longitude: 105.8,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Validated constructor. Rejects non-finite and out-of-range coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(Error::InvalidLocation(format!(
                "coordinates must be finite numbers (lat={}, lon={})",
                latitude, longitude
            )));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::InvalidLocation(format!(
                "latitude {} outside [-90, 90]",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::InvalidLocation(format!(
                "longitude {} outside [-180, 180]",
                longitude
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// Where the user position came from.
#[derive(Clone, Debug, PartialEq)]
pub enum LocationFix {
    /// A position reported by the user or a locator.
    Reported(GeoPoint),
    /// Locating failed; `DEFAULT_LOCATION` is used and the reason is kept for
    /// a visible warning.
    Fallback { reason: String },
}

impl LocationFix {
    /// Resolve an optional reported position, degrading to the default.
    pub fn resolve(reported: Option<(f64, f64)>) -> Self {
        match reported {
            Some((lat, lon)) => match GeoPoint::new(lat, lon) {
                Ok(point) => LocationFix::Reported(point),
                Err(err) => LocationFix::Fallback {
                    reason: err.to_string(),
                },
            },
            None => LocationFix::Fallback {
                reason: "location unavailable".to_string(),
            },
        }
    }

    pub fn point(&self) -> GeoPoint {
        match self {
            LocationFix::Reported(point) => *point,
            LocationFix::Fallback { .. } => DEFAULT_LOCATION,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            LocationFix::Reported(_) => None,
            LocationFix::Fallback { reason } => Some(reason),
        }
    }
}

/// A collection or recycling site.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposalPoint {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub accepted_types: Vec<String>,
    /// Kilometres from the user, filled in by `nearby`.
    #[serde(default)]
    pub distance: f64,
}

impl DisposalPoint {
    pub fn location(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    /// Whether this point takes the given material (case-insensitive).
    pub fn accepts(&self, material: &str) -> bool {
        self.accepted_types
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(material))
    }
}

struct StaticPoint {
    id: &'static str,
    name: &'static str,
    kind: &'static str,
    latitude: f64,
    longitude: f64,
    address: &'static str,
    accepted: &'static [&'static str],
}

const E_WASTE: &[&str] = &["E-waste", "Batteries", "Electronics"];

static KNOWN_POINTS: [StaticPoint; 5] = [
    StaticPoint {
        id: "1",
        name: "Nghĩa Tân Collection Point",
        kind: "E-Waste Recycling",
        latitude: 21.0467,
        longitude: 105.7992,
        address: "45 Nghĩa Tân, Cầu Giấy, Hanoi",
        accepted: E_WASTE,
    },
    StaticPoint {
        id: "2",
        name: "Hoàn Kiếm Collection Point",
        kind: "E-Waste Recycling",
        latitude: 21.0333,
        longitude: 105.85,
        address: "1 Trần Quang Khải, Hoàn Kiếm, Hanoi",
        accepted: E_WASTE,
    },
    StaticPoint {
        id: "3",
        name: "Quán Thánh Collection Point",
        kind: "E-Waste Recycling",
        latitude: 21.0417,
        longitude: 105.8422,
        address: "12-14 Phan Đình Phùng, Ba Đình, Hanoi",
        accepted: E_WASTE,
    },
    StaticPoint {
        id: "4",
        name: "Hanoi Recycling Center",
        kind: "Recycling Center",
        latitude: 21.03,
        longitude: 105.81,
        address: "123 Green Street, Hanoi",
        accepted: &["Plastic", "Paper", "Glass", "Metal"],
    },
    StaticPoint {
        id: "5",
        name: "General Waste Collection",
        kind: "Waste Disposal",
        latitude: 21.025,
        longitude: 105.805,
        address: "456 Tech Avenue, Hanoi",
        accepted: &["Organic", "General Waste"],
    },
];

/// The built-in collection points, with distance unset.
pub fn known_points() -> Vec<DisposalPoint> {
    KNOWN_POINTS
        .iter()
        .map(|p| DisposalPoint {
            id: p.id.to_string(),
            name: p.name.to_string(),
            kind: p.kind.to_string(),
            latitude: p.latitude,
            longitude: p.longitude,
            address: p.address.to_string(),
            accepted_types: p.accepted.iter().map(|s| s.to_string()).collect(),
            distance: 0.0,
        })
        .collect()
}

/// Great-circle distance in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Points within `max_distance_km` of the user, nearest first.
///
/// Fails with `Error::InvalidLocation` for non-finite or out-of-range user
/// coordinates; no distances are computed in that case.
pub fn nearby(
    user_lat: f64,
    user_lon: f64,
    points: &[DisposalPoint],
    max_distance_km: f64,
) -> Result<Vec<DisposalPoint>> {
    let user = GeoPoint::new(user_lat, user_lon)?;
    let mut found: Vec<DisposalPoint> = points
        .iter()
        .map(|point| DisposalPoint {
            distance: haversine_km(user, point.location()),
            ..point.clone()
        })
        .filter(|point| point.distance <= max_distance_km)
        .collect();
    found.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    log::debug!(
        "{} of {} disposal points within {} km of ({:.4}, {:.4})",
        found.len(),
        points.len(),
        max_distance_km,
        user.latitude,
        user.longitude
    );
    Ok(found)
}
