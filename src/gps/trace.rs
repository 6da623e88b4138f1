use crate::core::config::GpsConfig;
use crate::core::ids::{ConsignmentId, VehicleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// One GPS fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    /// Speed reported by the tracker, if any.
    #[serde(default)]
    pub speed_kmh: Option<f64>,
}

impl GpsPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            speed_kmh: None,
        }
    }

    pub fn with_speed(mut self, speed_kmh: f64) -> Self {
        self.speed_kmh = Some(speed_kmh);
        self
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn distance_km(&self, other: &GpsPoint) -> f64 {
        haversine_km(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Haversine distance between two coordinates, in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// The raw trace recorded for one consignment, in recording order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTrace {
    pub consignment_id: ConsignmentId,
    #[serde(default)]
    pub vehicle_id: Option<VehicleId>,
    pub points: Vec<GpsPoint>,
}

impl RawTrace {
    pub fn new(consignment_id: ConsignmentId, points: Vec<GpsPoint>) -> Self {
        Self {
            consignment_id,
            vehicle_id: None,
            points,
        }
    }
}

/// Physical measurements derived from a raw trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub point_count: usize,
    pub total_km: f64,
    pub travel_hours: f64,
    pub average_speed_kmh: f64,
    pub max_speed_kmh: f64,
    /// Segments with a positive time delta.
    pub timed_segments: usize,
    /// Segments driven above the speed limit.
    pub speed_violations: u32,
    pub stop_count: u32,
    pub stop_minutes: f64,
    pub longest_stop_minutes: f64,
    /// Length of each signal-loss gap, in minutes.
    pub signal_gaps: Vec<f64>,
    /// Timestamps going backwards somewhere in the trace.
    pub out_of_order: bool,
    /// Segments faster than any truck can drive.
    pub impossible_segments: usize,
}

impl TraceSummary {
    /// Summarise an ordered list of points.
    pub fn from_points(points: &[GpsPoint], config: &GpsConfig) -> Self {
        let mut summary = TraceSummary {
            point_count: points.len(),
            ..TraceSummary::default()
        };
        if points.len() < 2 {
            return summary;
        }

        for pair in points.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let km = a.distance_km(b);
            summary.total_km += km;

            let seconds = (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0;
            if seconds < 0.0 {
                summary.out_of_order = true;
                continue;
            }
            if seconds == 0.0 {
                continue;
            }

            let minutes = seconds / 60.0;
            if minutes > config.signal_gap_minutes {
                summary.signal_gaps.push(minutes);
            }

            let speed = km / (seconds / 3600.0);
            if speed > config.impossible_speed_kmh {
                summary.impossible_segments += 1;
                continue;
            }
            summary.timed_segments += 1;
            summary.max_speed_kmh = summary.max_speed_kmh.max(speed);
            if speed > config.speed_limit_kmh {
                summary.speed_violations += 1;
            }
        }

        // Reported speeds can catch bursts the sampling interval hides.
        for reported in points.iter().filter_map(|p| p.speed_kmh) {
            if reported <= config.impossible_speed_kmh {
                summary.max_speed_kmh = summary.max_speed_kmh.max(reported);
            }
        }

        let first = points[0].timestamp;
        let last = points[points.len() - 1].timestamp;
        summary.travel_hours = ((last - first).num_seconds() as f64 / 3600.0).max(0.0);
        if summary.travel_hours > 0.0 {
            summary.average_speed_kmh = summary.total_km / summary.travel_hours;
        }

        for dwell in dwell_minutes(points, config.stop_radius_m) {
            if dwell > config.min_stop_minutes {
                summary.stop_count += 1;
                summary.stop_minutes += dwell;
                summary.longest_stop_minutes = summary.longest_stop_minutes.max(dwell);
            }
        }

        summary
    }
}

/// Durations of runs of consecutive points that stay within `radius_m` of
/// the run's first point.
fn dwell_minutes(points: &[GpsPoint], radius_m: f64) -> Vec<f64> {
    let radius_km = radius_m / 1000.0;
    let mut dwells = Vec::new();
    let mut i = 0;
    while i < points.len() {
        let mut j = i;
        while j + 1 < points.len() && points[i].distance_km(&points[j + 1]) <= radius_km {
            j += 1;
        }
        if j > i {
            let minutes = (points[j].timestamp - points[i].timestamp).num_seconds() as f64 / 60.0;
            if minutes > 0.0 {
                dwells.push(minutes);
            }
        }
        i = j + 1;
    }
    dwells
}
