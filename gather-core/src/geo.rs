//! Great-circle discovery filter.
//!
//! Everything here is pure: callers hand in candidate events and a clock
//! reading, and get back the matching events ordered by start time.

use chrono::{DateTime, Utc};
use gather_shared::{Event, GeoPoint};
use serde::Serialize;

use crate::{CoreError, CoreResult};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = lat2 - lat1;
    let d_lng = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    // rounding can push h a hair above 1 for antipodal points
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone)]
pub struct NearbyQuery {
    pub origin: GeoPoint,
    pub radius_km: f64,
    pub category: Option<String>,
    /// Events must be over by this instant; `None` leaves the window open.
    pub until: Option<DateTime<Utc>>,
}

impl NearbyQuery {
    pub fn new(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        Self {
            origin: GeoPoint::new(latitude, longitude),
            radius_km,
            category: None,
            until: None,
        }
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        // blank means "any category"
        self.category = category.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn until(mut self, until: Option<DateTime<Utc>>) -> Self {
        self.until = until;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.origin.in_range() {
            return Err(CoreError::InvalidArgument(format!(
                "origin ({}, {}) is outside latitude [-90, 90] / longitude [-180, 180]",
                self.origin.latitude, self.origin.longitude
            )));
        }
        Ok(())
    }

    /// A non-positive (or NaN) radius can never match anything.
    pub fn is_empty_radius(&self) -> bool {
        self.radius_km.is_nan() || self.radius_km <= 0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Nearby {
    pub event: Event,
    pub distance_km: f64,
}

/// Keeps events within `radius_km` of the origin that have not started yet
/// (and match the category, if one is given), ordered by start time then id.
pub fn find_nearby<I>(candidates: I, query: &NearbyQuery, now: DateTime<Utc>) -> CoreResult<Vec<Nearby>>
where
    I: IntoIterator<Item = Event>,
{
    query.validate()?;
    if query.is_empty_radius() {
        return Ok(Vec::new());
    }

    let mut matches: Vec<Nearby> = candidates
        .into_iter()
        .filter(|event| event.starts_at >= now)
        .filter(|event| query.until.map_or(true, |until| event.ends_at <= until))
        .filter(|event| {
            query
                .category
                .as_deref()
                .map_or(true, |category| event.category == category)
        })
        .filter_map(|event| {
            let distance_km = haversine_km(query.origin, event.location);
            (distance_km <= query.radius_km).then_some(Nearby { event, distance_km })
        })
        .collect();

    matches.sort_by(|a, b| {
        a.event
            .starts_at
            .cmp(&b.event.starts_at)
            .then_with(|| a.event.id.cmp(&b.event.id))
    });

    Ok(matches)
}
