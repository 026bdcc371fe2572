//! Station catalog - resolves a destination name or id to coordinates

use crate::domain::geo::distance_m;
use crate::domain::types::{Coordinate, Destination};
use crate::infra::config::{Config, StationEntry};

pub trait StationCatalog: Send + Sync {
    /// Look up a stop by case-insensitive name or by its index in the catalog
    fn resolve(&self, name_or_id: &str) -> Option<Destination>;
}

/// Catalog backed by the configured station list
#[derive(Debug, Clone)]
pub struct StaticStationCatalog {
    stations: Vec<StationEntry>,
}

impl StaticStationCatalog {
    pub fn new(stations: Vec<StationEntry>) -> Self {
        Self { stations }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.stations().to_vec())
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationEntry> {
        self.stations.iter()
    }

    /// Closest stop to `coordinate` and its distance rounded to whole meters
    pub fn nearest(&self, coordinate: &Coordinate) -> Option<(Destination, u64)> {
        self.stations
            .iter()
            .map(|s| (s, distance_m(coordinate, &station_coordinate(s))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, d)| (to_destination(s), d.round() as u64))
    }
}

fn station_coordinate(station: &StationEntry) -> Coordinate {
    Coordinate::new(station.latitude, station.longitude)
}

fn to_destination(station: &StationEntry) -> Destination {
    Destination::new(&station.name, station_coordinate(station)).with_line(&station.line)
}

impl StationCatalog for StaticStationCatalog {
    fn resolve(&self, name_or_id: &str) -> Option<Destination> {
        let key = name_or_id.trim();
        if let Ok(index) = key.parse::<usize>() {
            return self.stations.get(index).map(to_destination);
        }
        self.stations
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(key))
            .map(to_destination)
    }
}
