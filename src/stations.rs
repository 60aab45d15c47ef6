/// Sensor registry for the Metro Manila monitoring area.
///
/// Defines the canonical list of sensor stations, the default affected-area
/// polygon published with active threats, and the distance helpers the
/// client uses to pick sensors near the user. This is the single source of
/// truth for station ids: the sensor feed, the classifier's descriptions and
/// the client's nearby-sensor list all resolve names from here.

use crate::model::LatLng;

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    WaterLevel,
    WindSpeed,
}

/// Metadata for a single sensor station.
#[derive(Debug)]
pub struct Station {
    /// Stable id, as reported by the sensor feed.
    pub id: &'static str,
    /// Human-readable name used in threat descriptions.
    pub name: &'static str,
    pub location: LatLng,
    pub kind: SensorKind,
}

/// All monitored stations, roughly west to east.
pub static STATION_REGISTRY: &[Station] = &[
    Station {
        id: "manila-bay",
        name: "Manila Bay Station",
        location: LatLng::new(14.5995, 120.9842),
        kind: SensorKind::WaterLevel,
    },
    Station {
        id: "navotas",
        name: "Navotas Station",
        location: LatLng::new(14.6700, 120.9400),
        kind: SensorKind::WaterLevel,
    },
    Station {
        id: "roxas_boulevard_water",
        name: "Roxas Boulevard",
        location: LatLng::new(14.5895, 120.9752),
        kind: SensorKind::WaterLevel,
    },
    Station {
        id: "mabini_bridge_water",
        name: "Mabini St. Bridge",
        location: LatLng::new(14.6055, 120.9892),
        kind: SensorKind::WaterLevel,
    },
    Station {
        id: "quezon_blvd_wind",
        name: "Quezon Boulevard",
        location: LatLng::new(14.5955, 120.9792),
        kind: SensorKind::WindSpeed,
    },
    Station {
        id: "pasig-river",
        name: "Pasig River Station",
        location: LatLng::new(14.5700, 121.0000),
        kind: SensorKind::WaterLevel,
    },
    Station {
        id: "paranaque",
        name: "Parañaque Station",
        location: LatLng::new(14.4800, 121.0000),
        kind: SensorKind::WaterLevel,
    },
    Station {
        id: "marikina",
        name: "Marikina Station",
        location: LatLng::new(14.6500, 121.0500),
        kind: SensorKind::WaterLevel,
    },
];

/// Affected-area boundary published with active threats. Closed ring.
pub static METRO_MANILA_POLYGON: &[LatLng] = &[
    LatLng::new(14.75, 120.90),
    LatLng::new(14.75, 121.15),
    LatLng::new(14.40, 121.15),
    LatLng::new(14.40, 120.90),
    LatLng::new(14.75, 120.90),
];

/// Radius within which a station counts as "nearby" for a client.
pub const NEARBY_RADIUS_M: f64 = 10_000.0;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

pub fn find_station(id: &str) -> Option<&'static Station> {
    STATION_REGISTRY.iter().find(|s| s.id == id)
}

/// Registry name for `id`, or the id itself for stations not (yet) in the
/// registry.
pub fn display_name(id: &str) -> &str {
    find_station(id).map(|s| s.name).unwrap_or(id)
}

// ---------------------------------------------------------------------------
// Distance
// ---------------------------------------------------------------------------

/// Great-circle distance in meters (haversine).
pub fn distance_m(a: LatLng, b: LatLng) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Stations within `radius_m` of `point`, nearest first.
pub fn nearby_stations(point: LatLng, radius_m: f64) -> Vec<(&'static Station, f64)> {
    let mut nearby: Vec<_> = STATION_REGISTRY
        .iter()
        .map(|s| (s, distance_m(point, s.location)))
        .filter(|(_, d)| *d < radius_m)
        .collect();
    nearby.sort_by(|a, b| a.1.total_cmp(&b.1));
    nearby
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
