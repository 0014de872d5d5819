//! Walking directions to a disposal point.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::disposal::{DisposalPoint, GeoPoint};
use crate::error::{Error, Result};

pub const DEFAULT_DIRECTIONS_URL: &str = "https://api.mapbox.com/directions/v5/mapbox/walking";

/// GeoJSON line geometry of a route.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]` pairs.
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Deserialize)]
struct DirectionsRoute {
    geometry: RouteGeometry,
}

pub trait DirectionsProvider: Send + Sync {
    /// First walking route between two points. `Error::NoRoute` when the
    /// service answers with no routes.
    fn walking_route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteGeometry>;
}

/// Mapbox Directions API.
pub struct MapboxDirections {
    base_url: String,
    token: String,
    agent: ureq::Agent,
}

impl MapboxDirections {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn request_url(&self, from: GeoPoint, to: GeoPoint) -> String {
        format!(
            "{}/{},{};{},{}?geometries=geojson&access_token={}",
            self.base_url, from.longitude, from.latitude, to.longitude, to.latitude, self.token
        )
    }
}

impl DirectionsProvider for MapboxDirections {
    fn walking_route(&self, from: GeoPoint, to: GeoPoint) -> Result<RouteGeometry> {
        // The request URL carries the access token; keep it out of logs and errors.
        log::debug!(
            "requesting walking route ({:.4},{:.4}) -> ({:.4},{:.4})",
            from.latitude,
            from.longitude,
            to.latitude,
            to.longitude
        );
        let response = self
            .agent
            .get(&self.request_url(from, to))
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(status, _) => Error::Backend {
                    url: self.base_url.clone(),
                    status,
                },
                ureq::Error::Transport(transport) => Error::Http {
                    url: self.base_url.clone(),
                    reason: transport.kind().to_string(),
                },
            })?;
        let text = response
            .into_string()
            .map_err(|e| Error::Decode(format!("unreadable directions body: {}", e)))?;
        let body: DirectionsResponse = serde_json::from_str(&text)?;
        first_route(body)
    }
}

fn first_route(body: DirectionsResponse) -> Result<RouteGeometry> {
    body.routes
        .into_iter()
        .next()
        .map(|route| route.geometry)
        .ok_or(Error::NoRoute)
}

/// Outcome of selecting a point, for display.
#[derive(Clone, Debug, PartialEq)]
pub enum RouteStatus {
    Found,
    NotFound,
    Failed(String),
}

/// Tracks the selected disposal point and the route to it.
pub struct RoutePlanner {
    provider: Box<dyn DirectionsProvider>,
    selected: Option<DisposalPoint>,
    route: Option<RouteGeometry>,
}

impl RoutePlanner {
    pub fn new(provider: Box<dyn DirectionsProvider>) -> Self {
        Self {
            provider,
            selected: None,
            route: None,
        }
    }

    /// Select a point and fetch a route from the user to it. Any previous
    /// route is dropped first, so a failure never leaves a stale line.
    pub fn select(&mut self, user: GeoPoint, point: DisposalPoint) -> RouteStatus {
        self.route = None;
        let to = point.location();
        self.selected = Some(point);
        match self.provider.walking_route(user, to) {
            Ok(route) => {
                self.route = Some(route);
                RouteStatus::Found
            }
            Err(Error::NoRoute) => RouteStatus::NotFound,
            Err(err) => {
                log::warn!("route lookup failed: {}", err);
                RouteStatus::Failed(err.to_string())
            }
        }
    }

    pub fn clear(&mut self) {
        self.selected = None;
        self.route = None;
    }

    pub fn selected(&self) -> Option<&DisposalPoint> {
        self.selected.as_ref()
    }

    pub fn route(&self) -> Option<&RouteGeometry> {
        self.route.as_ref()
    }
}
