use geo::{HaversineDistance, Point};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct City {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl City {
    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

pub const CITIES: &[City] = &[
    City { name: "Manaus", lat: -3.119, lon: -60.0217 },
    City { name: "Belém", lat: -1.4558, lon: -48.4902 },
    City { name: "São Paulo", lat: -23.5505, lon: -46.6333 },
    City { name: "Rio de Janeiro", lat: -22.9068, lon: -43.1729 },
    City { name: "Brasília", lat: -15.7939, lon: -47.8828 },
    City { name: "Fortaleza", lat: -3.7172, lon: -38.5433 },
    City { name: "Recife", lat: -8.0476, lon: -34.877 },
    City { name: "Curitiba", lat: -25.4284, lon: -49.2733 },
    City { name: "Salvador", lat: -12.9777, lon: -38.5016 },
    City { name: "Porto Alegre", lat: -30.0346, lon: -51.2177 },
];

/// Exact-name lookup.
pub fn find(name: &str) -> Option<&'static City> {
    CITIES.iter().find(|c| c.name == name)
}

// Wrapper so the R-tree can index cities by [lon, lat]
struct CityEntry(&'static City);

impl RTreeObject for CityEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.0.lon, self.0.lat])
    }
}

impl PointDistance for CityEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.0.lon - point[0];
        let dy = self.0.lat - point[1];
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NearestCity {
    pub city: City,
    pub distance_km: f64,
}

/// Spatial index over the known cities.
pub struct CityIndex {
    tree: RTree<CityEntry>,
}

impl CityIndex {
    pub fn new() -> Self {
        let entries = CITIES.iter().map(CityEntry).collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Closest known city to the given coordinate. Candidate selection is
    /// planar in degrees; the reported distance is great-circle.
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<NearestCity> {
        let entry = self.tree.nearest_neighbor(&[lon, lat])?;
        let distance_m = entry.0.point().haversine_distance(&Point::new(lon, lat));
        Some(NearestCity {
            city: *entry.0,
            distance_km: distance_m / 1000.0,
        })
    }
}

impl Default for CityIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_is_exact() {
        assert_eq!(find("Belém").map(|c| c.lat), Some(-1.4558));
        assert!(find("belém").is_none());
        assert!(find("Lisboa").is_none());
    }

    #[test]
    fn names_are_unique() {
        for (i, a) in CITIES.iter().enumerate() {
            assert!(CITIES[i + 1..].iter().all(|b| b.name != a.name), "{}", a.name);
        }
    }

    #[test]
    fn nearest_finds_capital() {
        let index = CityIndex::new();

        // Niterói, across the bay from Rio
        let nearest = index.nearest(-22.8832, -43.1034).unwrap();
        assert_eq!(nearest.city.name, "Rio de Janeiro");
        assert!(nearest.distance_km < 15.0);

        // Campinas
        let nearest = index.nearest(-22.9099, -47.0626).unwrap();
        assert_eq!(nearest.city.name, "São Paulo");
    }

    #[test]
    fn nearest_on_city_is_zero_distance() {
        let index = CityIndex::new();
        let nearest = index.nearest(-3.119, -60.0217).unwrap();
        assert_eq!(nearest.city.name, "Manaus");
        assert!(nearest.distance_km.abs() < 1e-6);
    }
}
