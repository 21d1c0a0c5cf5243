use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cities::City;

/// One person's reported planting action in a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contributor {
    pub id: u64,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "qtd")]
    pub quantity: u64,
    #[serde(rename = "verificado")]
    pub verified: bool,
}

/// Per-city aggregate. `total` is derived and recomputed after every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub lat: f64,
    pub lon: f64,
    pub total: u64,
    #[serde(rename = "usuarios")]
    pub contributors: Vec<Contributor>,
}

impl ContributionRecord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            total: 0,
            contributors: Vec::new(),
        }
    }

    /// Saturates; callers check additions with `Registry::total_after` first.
    pub fn recompute_total(&mut self) {
        self.total = self
            .contributors
            .iter()
            .fold(0u64, |acc, c| acc.saturating_add(c.quantity));
    }
}

/// A contributor together with the city it was reported for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityContributor<'a> {
    pub city: &'a str,
    #[serde(flatten)]
    pub contributor: &'a Contributor,
}

/// City name -> contribution record. Serialized as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    records: BTreeMap<String, ContributionRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, city: &str) -> Option<&ContributionRecord> {
        self.records.get(city)
    }

    pub fn records(&self) -> impl Iterator<Item = (&str, &ContributionRecord)> {
        self.records.iter().map(|(city, record)| (city.as_str(), record))
    }

    pub fn insert_record(&mut self, city: String, record: ContributionRecord) {
        self.records.insert(city, record);
    }

    /// All contributors, city by city, in stored order.
    pub fn contributors(&self) -> impl Iterator<Item = CityContributor<'_>> {
        self.records.iter().flat_map(|(city, record)| {
            record.contributors.iter().map(move |contributor| CityContributor {
                city: city.as_str(),
                contributor,
            })
        })
    }

    pub fn contributor_count(&self) -> usize {
        self.records.values().map(|r| r.contributors.len()).sum()
    }

    /// City total after adding `quantity`, or `None` if it would not fit.
    pub fn total_after(&self, city: &str, quantity: u64) -> Option<u64> {
        self.records
            .get(city)
            .map_or(0, |r| r.total)
            .checked_add(quantity)
    }

    /// Appends a contributor to the city's record, creating the record at the
    /// city's coordinates on first use. Returns the new city total.
    pub fn add_contribution(&mut self, city: &City, contributor: Contributor) -> u64 {
        let record = self
            .records
            .entry(city.name.to_string())
            .or_insert_with(|| ContributionRecord::new(city.lat, city.lon));
        record.contributors.push(contributor);
        record.recompute_total();
        record.total
    }

    /// Flips the verified flag. `None` when the contributor does not exist.
    pub fn toggle_verification(&mut self, city: &str, id: u64) -> Option<bool> {
        let contributor = self
            .records
            .get_mut(city)?
            .contributors
            .iter_mut()
            .find(|c| c.id == id)?;
        contributor.verified = !contributor.verified;
        Some(contributor.verified)
    }

    /// Removes a contributor. Returns `Some(true)` when the city record was
    /// emptied and dropped, `None` when nothing matched.
    pub fn delete_contributor(&mut self, city: &str, id: u64) -> Option<bool> {
        let record = self.records.get_mut(city)?;
        let before = record.contributors.len();
        record.contributors.retain(|c| c.id != id);
        if record.contributors.len() == before {
            return None;
        }
        record.recompute_total();
        if record.contributors.is_empty() {
            self.records.remove(city);
            return Some(true);
        }
        Some(false)
    }

    /// Recomputes every total and drops records without contributors.
    pub fn normalize(&mut self) {
        self.records.retain(|_, record| !record.contributors.is_empty());
        for record in self.records.values_mut() {
            record.recompute_total();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cities;

    fn contributor(id: u64, name: &str, quantity: u64) -> Contributor {
        Contributor {
            id,
            name: name.to_string(),
            quantity,
            verified: false,
        }
    }

    #[test]
    fn add_appends_and_sums() {
        let manaus = cities::find("Manaus").unwrap();
        let mut registry = Registry::new();

        assert_eq!(registry.add_contribution(manaus, contributor(1, "Alice", 5)), 5);
        assert_eq!(registry.add_contribution(manaus, contributor(2, "Bob", 3)), 8);

        let record = registry.get("Manaus").unwrap();
        assert_eq!(record.contributors.len(), 2);
        assert_eq!(record.lat, manaus.lat);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn deleting_last_contributor_drops_city() {
        let recife = cities::find("Recife").unwrap();
        let mut registry = Registry::new();
        registry.add_contribution(recife, contributor(7, "Ana", 2));

        assert_eq!(registry.delete_contributor("Recife", 7), Some(true));
        assert!(registry.get("Recife").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn deleting_one_of_many_keeps_city() {
        let recife = cities::find("Recife").unwrap();
        let mut registry = Registry::new();
        registry.add_contribution(recife, contributor(1, "Ana", 2));
        registry.add_contribution(recife, contributor(2, "Caio", 4));

        assert_eq!(registry.delete_contributor("Recife", 1), Some(false));
        assert_eq!(registry.get("Recife").unwrap().total, 4);
        assert_eq!(registry.delete_contributor("Recife", 99), None);
        assert_eq!(registry.delete_contributor("Belém", 2), None);
    }

    #[test]
    fn toggle_twice_restores_flag() {
        let salvador = cities::find("Salvador").unwrap();
        let mut registry = Registry::new();
        registry.add_contribution(salvador, contributor(3, "Rui", 1));

        assert_eq!(registry.toggle_verification("Salvador", 3), Some(true));
        assert_eq!(registry.toggle_verification("Salvador", 3), Some(false));
        assert_eq!(registry.toggle_verification("Salvador", 4), None);
    }

    #[test]
    fn normalize_recomputes_and_drops_empty() {
        let mut registry = Registry::new();
        let mut stale = ContributionRecord::new(0.0, 0.0);
        stale.contributors.push(contributor(1, "X", 10));
        stale.total = 999;
        registry.insert_record("Curitiba".into(), stale);
        registry.insert_record("Brasília".into(), ContributionRecord::new(1.0, 1.0));

        registry.normalize();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Curitiba").unwrap().total, 10);
    }

    #[test]
    fn total_after_detects_overflow() {
        let manaus = cities::find("Manaus").unwrap();
        let mut registry = Registry::new();
        assert_eq!(registry.total_after("Manaus", u64::MAX), Some(u64::MAX));

        registry.add_contribution(manaus, contributor(1, "A", u64::MAX - 1));
        assert_eq!(registry.total_after("Manaus", 1), Some(u64::MAX));
        assert_eq!(registry.total_after("Manaus", 2), None);
        assert_eq!(registry.total_after("Belém", 2), Some(2));
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let manaus = cities::find("Manaus").unwrap();
        let mut registry = Registry::new();
        registry.add_contribution(manaus, contributor(1, "Alice", 5));

        let value = serde_json::to_value(&registry).unwrap();
        let user = &value["Manaus"]["usuarios"][0];
        assert_eq!(user["nome"], "Alice");
        assert_eq!(user["qtd"], 5);
        assert_eq!(user["verificado"], false);
        assert_eq!(value["Manaus"]["total"], 5);
    }
}
