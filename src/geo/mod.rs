use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::agent::{GeoPoint, LocationSample};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub agent_id: Uuid,
    pub sample: LocationSample,
    pub distance_km: f64,
}

/// Latest known position per agent plus the append-only sample history.
/// Writes for different agents never contend with each other.
#[derive(Default)]
pub struct GeoIndex {
    latest: DashMap<Uuid, LocationSample>,
    history: DashMap<Uuid, Vec<LocationSample>>,
}

impl GeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the agent's authoritative position and appends to history.
    pub fn upsert(&self, sample: LocationSample) -> Result<LocationSample, AppError> {
        validate_sample(&sample)?;

        self.history
            .entry(sample.agent_id)
            .or_default()
            .push(sample.clone());
        self.latest.insert(sample.agent_id, sample.clone());

        Ok(sample)
    }

    pub fn latest(&self, agent_id: Uuid) -> Option<LocationSample> {
        self.latest.get(&agent_id).map(|entry| entry.value().clone())
    }

    /// Samples recorded at or after `since`, oldest first.
    pub fn history(&self, agent_id: Uuid, since: DateTime<Utc>) -> Vec<LocationSample> {
        self.history
            .get(&agent_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|sample| sample.recorded_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Agents within `max_km` of `target` whose id passes `eligible`,
    /// ordered by ascending great-circle distance. Ties go to the freshest
    /// sample, then the smaller agent id. An empty result is a normal
    /// answer, not an error.
    pub fn nearest(
        &self,
        target: &GeoPoint,
        max_km: f64,
        eligible: impl Fn(Uuid) -> bool,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self
            .latest
            .iter()
            .filter(|entry| eligible(*entry.key()))
            .filter_map(|entry| {
                let sample = entry.value();
                let distance_km = haversine_km(&sample.location, target);
                (distance_km <= max_km).then(|| Candidate {
                    agent_id: *entry.key(),
                    sample: sample.clone(),
                    distance_km,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| b.sample.recorded_at.cmp(&a.sample.recorded_at))
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        candidates
    }
}

fn validate_sample(sample: &LocationSample) -> Result<(), AppError> {
    if !sample.location.in_range() {
        return Err(AppError::Validation(format!(
            "coordinates out of range: ({}, {})",
            sample.location.lat, sample.location.lng
        )));
    }

    if let Some(accuracy) = sample.accuracy {
        if accuracy <= 0.0 {
            return Err(AppError::Validation("accuracy must be > 0".to_string()));
        }
    }

    if let Some(speed) = sample.speed {
        if speed < 0.0 {
            return Err(AppError::Validation("speed must be >= 0".to_string()));
        }
    }

    if let Some(heading) = sample.heading {
        if !(0.0..=360.0).contains(&heading) {
            return Err(AppError::Validation(
                "heading must be within [0, 360]".to_string(),
            ));
        }
    }

    Ok(())
}
