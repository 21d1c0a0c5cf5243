//! Commands that read, modify and persist the registry.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cities;
use crate::error::{OpError, OpResult};
use crate::ids;
use crate::schema;
use crate::store::{RegistryStore, Storage};
use crate::types::Contributor;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    AddContribution {
        name: String,
        city: String,
        quantity: i64,
    },
    ToggleVerification {
        id: u64,
        city: String,
    },
    DeleteContributor {
        id: u64,
        city: String,
        #[serde(default)]
        confirmed: bool,
    },
    ClearAll {
        #[serde(default)]
        confirmed: bool,
    },
    Export,
    Import {
        contents: String,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::AddContribution { .. } => "add_contribution",
            Command::ToggleVerification { .. } => "toggle_verification",
            Command::DeleteContributor { .. } => "delete_contributor",
            Command::ClearAll { .. } => "clear_all",
            Command::Export => "export",
            Command::Import { .. } => "import",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Added {
        city: String,
        contributor: Contributor,
        total: u64,
    },
    Toggled {
        city: String,
        id: u64,
        verified: bool,
    },
    Deleted {
        city: String,
        id: u64,
        city_removed: bool,
    },
    /// Nothing matched; the store was not touched.
    Unchanged,
    Cleared,
    Exported {
        contents: String,
    },
    Imported {
        cities: usize,
        contributors: usize,
    },
}

impl Outcome {
    /// User-facing confirmation.
    pub fn message(&self) -> String {
        match self {
            Outcome::Added {
                city,
                contributor,
                total,
            } => format!(
                "🌱 {} planted {} tree(s) in {}. City total: {}.",
                contributor.name, contributor.quantity, city, total
            ),
            Outcome::Toggled { verified: true, .. } => "Contribution verified.".to_string(),
            Outcome::Toggled { verified: false, .. } => "Verification removed.".to_string(),
            Outcome::Deleted {
                city,
                city_removed: true,
                ..
            } => format!("Contribution removed. {city} has no contributions left."),
            Outcome::Deleted { .. } => "Contribution removed.".to_string(),
            Outcome::Unchanged => "No matching contribution.".to_string(),
            Outcome::Cleared => "All records cleared.".to_string(),
            Outcome::Exported { .. } => "Registry exported.".to_string(),
            Outcome::Imported {
                cities,
                contributors,
            } => format!("Imported {contributors} contribution(s) across {cities} city(ies)."),
        }
    }
}

/// Parses a quantity typed into a form.
pub fn parse_quantity(input: &str) -> OpResult<i64> {
    input
        .trim()
        .parse()
        .map_err(|_| OpError::InvalidQuantity(input.to_string()))
}

/// Runs one command against the store: load, modify, save.
pub fn execute<S: Storage>(store: &mut RegistryStore<S>, command: Command) -> OpResult<Outcome> {
    match command {
        Command::AddContribution {
            name,
            city,
            quantity,
        } => add_contribution(store, &name, &city, quantity),
        Command::ToggleVerification { id, city } => toggle_verification(store, id, &city),
        Command::DeleteContributor {
            id,
            city,
            confirmed,
        } => {
            require_confirmation(confirmed, "Deleting a contribution")?;
            delete_contributor(store, id, &city)
        }
        Command::ClearAll { confirmed } => {
            require_confirmation(confirmed, "Clearing all records")?;
            store.clear()?;
            info!("Registry cleared");
            Ok(Outcome::Cleared)
        }
        Command::Export => Ok(Outcome::Exported {
            contents: store.export()?,
        }),
        Command::Import { contents } => import(store, &contents),
    }
}

fn require_confirmation(confirmed: bool, what: &'static str) -> OpResult<()> {
    if confirmed {
        Ok(())
    } else {
        Err(OpError::ConfirmationRequired(what))
    }
}

fn add_contribution<S: Storage>(
    store: &mut RegistryStore<S>,
    name: &str,
    city_name: &str,
    quantity: i64,
) -> OpResult<Outcome> {
    let name = name.trim();
    if name.is_empty() {
        return Err(OpError::EmptyName);
    }
    if city_name.trim().is_empty() {
        return Err(OpError::MissingCity);
    }
    let city = cities::find(city_name).ok_or_else(|| OpError::UnknownCity(city_name.to_string()))?;
    let quantity = u64::try_from(quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or_else(|| OpError::InvalidQuantity(quantity.to_string()))?;

    let mut registry = store.load();
    if registry.total_after(city.name, quantity).is_none() {
        return Err(OpError::TotalOverflow {
            city: city.name.to_string(),
            quantity,
        });
    }
    let taken = registry
        .get(city.name)
        .map(|r| r.contributors.as_slice())
        .unwrap_or_default();
    let contributor = Contributor {
        id: ids::next_id(taken),
        name: name.to_string(),
        quantity,
        verified: false,
    };
    let total = registry.add_contribution(city, contributor.clone());
    store.save(&registry)?;

    info!(city = city.name, id = contributor.id, quantity, total, "Contribution added");
    Ok(Outcome::Added {
        city: city.name.to_string(),
        contributor,
        total,
    })
}

fn toggle_verification<S: Storage>(
    store: &mut RegistryStore<S>,
    id: u64,
    city: &str,
) -> OpResult<Outcome> {
    let mut registry = store.load();
    let Some(verified) = registry.toggle_verification(city, id) else {
        return Ok(Outcome::Unchanged);
    };
    store.save(&registry)?;

    info!(city, id, verified, "Verification toggled");
    Ok(Outcome::Toggled {
        city: city.to_string(),
        id,
        verified,
    })
}

fn delete_contributor<S: Storage>(
    store: &mut RegistryStore<S>,
    id: u64,
    city: &str,
) -> OpResult<Outcome> {
    let mut registry = store.load();
    let Some(city_removed) = registry.delete_contributor(city, id) else {
        return Ok(Outcome::Unchanged);
    };
    store.save(&registry)?;

    info!(city, id, city_removed, "Contribution deleted");
    Ok(Outcome::Deleted {
        city: city.to_string(),
        id,
        city_removed,
    })
}

fn import<S: Storage>(store: &mut RegistryStore<S>, contents: &str) -> OpResult<Outcome> {
    let value = serde_json::from_str(contents).map_err(OpError::ImportParse)?;
    let registry = schema::migrate(value)?;
    store.save(&registry)?;

    let outcome = Outcome::Imported {
        cities: registry.len(),
        contributors: registry.contributor_count(),
    };
    info!(?outcome, "Registry imported");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render;
    use crate::store::{MemoryStorage, DEFAULT_KEY};
    use pretty_assertions::assert_eq;

    fn store() -> RegistryStore<MemoryStorage> {
        RegistryStore::new(MemoryStorage::default(), DEFAULT_KEY)
    }

    fn add(store: &mut RegistryStore<MemoryStorage>, name: &str, city: &str, quantity: i64) -> OpResult<Outcome> {
        execute(
            store,
            Command::AddContribution {
                name: name.into(),
                city: city.into(),
                quantity,
            },
        )
    }

    fn first_id(store: &RegistryStore<MemoryStorage>, city: &str) -> u64 {
        store.load().get(city).unwrap().contributors[0].id
    }

    #[test]
    fn alice_and_bob_in_manaus() {
        let mut store = store();
        add(&mut store, "Alice", "Manaus", 5).unwrap();
        let outcome = add(&mut store, "Bob", "Manaus", 3).unwrap();
        assert!(matches!(outcome, Outcome::Added { total: 8, .. }));

        let registry = store.load();
        let manaus = registry.get("Manaus").unwrap();
        assert_eq!(manaus.total, 8);
        assert_eq!(manaus.contributors.len(), 2);

        let ranking = render::ranking(&registry, 5);
        assert_eq!(ranking[0].name, "Alice");
        assert_eq!(ranking[0].quantity, 5);
        assert_eq!(ranking[1].name, "Bob");
    }

    #[test]
    fn total_tracks_sum_after_each_add() {
        let mut store = store();
        for (i, q) in [4, 1, 9, 2].into_iter().enumerate() {
            add(&mut store, &format!("p{i}"), "Curitiba", q).unwrap();
            let record = store.load().get("Curitiba").unwrap().clone();
            let sum: u64 = record.contributors.iter().map(|c| c.quantity).sum();
            assert_eq!(record.total, sum);
        }
    }

    #[test]
    fn name_is_trimmed_and_new_contributors_unverified() {
        let mut store = store();
        let outcome = add(&mut store, "  Alice  ", "Manaus", 1).unwrap();
        let Outcome::Added { contributor, .. } = outcome else {
            panic!("unexpected outcome");
        };
        assert_eq!(contributor.name, "Alice");
        assert!(!contributor.verified);
    }

    #[test]
    fn validation_rejects_without_touching_store() {
        let mut store = store();
        add(&mut store, "Alice", "Manaus", 5).unwrap();
        let before = store.load();

        assert!(matches!(add(&mut store, "   ", "Manaus", 5), Err(OpError::EmptyName)));
        assert!(matches!(add(&mut store, "Bob", "", 5), Err(OpError::MissingCity)));
        assert!(matches!(add(&mut store, "Bob", "Gotham", 5), Err(OpError::UnknownCity(_))));
        assert!(matches!(add(&mut store, "Bob", "Manaus", 0), Err(OpError::InvalidQuantity(_))));
        assert!(matches!(add(&mut store, "Bob", "Manaus", -2), Err(OpError::InvalidQuantity(_))));

        assert_eq!(store.load(), before);
    }

    #[test]
    fn adds_that_would_overflow_the_total_are_rejected() {
        let mut store = store();
        add(&mut store, "A", "Manaus", i64::MAX).unwrap();
        add(&mut store, "B", "Manaus", i64::MAX).unwrap();
        let before = store.load();

        let err = add(&mut store, "C", "Manaus", i64::MAX).unwrap_err();
        assert!(matches!(err, OpError::TotalOverflow { .. }));
        assert!(err.is_user_error());
        assert_eq!(store.load(), before);
        assert_eq!(before.get("Manaus").unwrap().total, 2 * i64::MAX as u64);
    }

    #[test]
    fn row_actions_reach_contributors_loaded_without_ids() {
        let mut storage = MemoryStorage::default();
        storage
            .set(
                DEFAULT_KEY,
                r#"{"Manaus":{"lat":-3.119,"lon":-60.0217,"total":5,"usuarios":[{"nome":"Alice","qtd":5}]}}"#,
            )
            .unwrap();
        let mut store = RegistryStore::new(storage, DEFAULT_KEY);

        let rows = render::management_rows(&store.load());
        assert_eq!(render::management_rows(&store.load()), rows);
        let id = rows[0].id;

        let toggled = execute(
            &mut store,
            Command::ToggleVerification {
                id,
                city: "Manaus".into(),
            },
        )
        .unwrap();
        assert!(matches!(toggled, Outcome::Toggled { verified: true, .. }));
        assert!(store.load().get("Manaus").unwrap().contributors[0].verified);

        let deleted = execute(
            &mut store,
            Command::DeleteContributor {
                id,
                city: "Manaus".into(),
                confirmed: true,
            },
        )
        .unwrap();
        assert!(matches!(deleted, Outcome::Deleted { city_removed: true, .. }));
        assert!(store.load().is_empty());
    }

    #[test]
    fn parse_quantity_accepts_integers_only() {
        assert_eq!(parse_quantity(" 12 ").unwrap(), 12);
        assert!(parse_quantity("12abc").is_err());
        assert!(parse_quantity("1.5").is_err());
        assert!(parse_quantity("").is_err());
    }

    #[test]
    fn toggle_twice_round_trips() {
        let mut store = store();
        add(&mut store, "Alice", "Belém", 2).unwrap();
        let id = first_id(&store, "Belém");
        let toggle = || Command::ToggleVerification {
            id,
            city: "Belém".into(),
        };

        let first = execute(&mut store, toggle()).unwrap();
        assert!(matches!(first, Outcome::Toggled { verified: true, .. }));
        let second = execute(&mut store, toggle()).unwrap();
        assert!(matches!(second, Outcome::Toggled { verified: false, .. }));
        assert!(!store.load().get("Belém").unwrap().contributors[0].verified);
    }

    #[test]
    fn toggle_unknown_is_silent_noop() {
        let mut store = store();
        let outcome = execute(
            &mut store,
            Command::ToggleVerification {
                id: 1,
                city: "Recife".into(),
            },
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Unchanged);
        assert!(store.storage().get(DEFAULT_KEY).unwrap().is_none());
    }

    #[test]
    fn deleting_only_contributor_removes_city() {
        let mut store = store();
        add(&mut store, "Alice", "Recife", 2).unwrap();
        add(&mut store, "Bob", "Salvador", 1).unwrap();
        let id = first_id(&store, "Recife");

        let refused = execute(
            &mut store,
            Command::DeleteContributor {
                id,
                city: "Recife".into(),
                confirmed: false,
            },
        );
        assert!(matches!(refused, Err(OpError::ConfirmationRequired(_))));
        assert!(store.load().get("Recife").is_some());

        let outcome = execute(
            &mut store,
            Command::DeleteContributor {
                id,
                city: "Recife".into(),
                confirmed: true,
            },
        )
        .unwrap();
        assert!(matches!(outcome, Outcome::Deleted { city_removed: true, .. }));
        let registry = store.load();
        assert!(registry.records().all(|(city, _)| city != "Recife"));
        assert!(registry.get("Salvador").is_some());
    }

    #[test]
    fn clear_all_requires_confirmation_and_erases_blob() {
        let mut store = store();
        add(&mut store, "Alice", "Manaus", 5).unwrap();

        let refused = execute(&mut store, Command::ClearAll { confirmed: false });
        assert!(matches!(refused, Err(OpError::ConfirmationRequired(_))));
        assert!(!store.load().is_empty());

        assert_eq!(execute(&mut store, Command::ClearAll { confirmed: true }).unwrap(), Outcome::Cleared);
        assert!(store.storage().get(DEFAULT_KEY).unwrap().is_none());

        let registry = store.load();
        assert!(registry.is_empty());
        assert_eq!(render::ranking_html(&render::ranking(&registry, 5)), render::ranking_html(&[]));
        assert!(render::management_html(&render::management_rows(&registry)).contains(render::EMPTY_MESSAGE));
        assert!(render::markers(&registry).features.is_empty());
    }

    #[test]
    fn import_array_is_rejected_and_store_kept() {
        let mut store = store();
        add(&mut store, "Alice", "Manaus", 5).unwrap();
        let before = store.load();

        let result = execute(
            &mut store,
            Command::Import {
                contents: r#"["not","an","object"]"#.into(),
            },
        );
        assert!(matches!(result, Err(OpError::ImportShape(_))));
        assert_eq!(store.load(), before);
    }

    #[test]
    fn import_parse_error_carries_parser_message() {
        let mut store = store();
        let err = execute(
            &mut store,
            Command::Import {
                contents: "{ oops".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, OpError::ImportParse(_)));
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn import_replaces_and_export_round_trips() {
        let mut store = store();
        add(&mut store, "Old", "Fortaleza", 1).unwrap();

        let contents = r#"{
            "Manaus": { "lat": -3.119, "lon": -60.0217, "total": 0,
                        "usuarios": [{ "nome": "Alice", "qtd": "5" }, { "id": 9, "nome": "Bob", "qtd": 3, "verificado": true }] }
        }"#;
        let outcome = execute(
            &mut store,
            Command::Import {
                contents: contents.into(),
            },
        )
        .unwrap();
        assert_eq!(
            outcome,
            Outcome::Imported {
                cities: 1,
                contributors: 2
            }
        );
        assert!(store.load().get("Fortaleza").is_none());

        let Outcome::Exported { contents: exported } = execute(&mut store, Command::Export).unwrap() else {
            panic!("unexpected outcome");
        };
        let exported: serde_json::Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(exported, serde_json::to_value(store.load()).unwrap());
        assert_eq!(exported["Manaus"]["total"], 8);
        assert_eq!(exported["Manaus"]["usuarios"][1]["id"], 9);
        assert!(exported["Manaus"]["usuarios"][0]["id"].is_u64());
    }

    #[test]
    fn commands_deserialize_from_tagged_json() {
        let command: Command =
            serde_json::from_str(r#"{"type":"add_contribution","name":"A","city":"Manaus","quantity":2}"#).unwrap();
        assert_eq!(command.name(), "add_contribution");

        let command: Command = serde_json::from_str(r#"{"type":"clear_all"}"#).unwrap();
        assert_eq!(command, Command::ClearAll { confirmed: false });

        let command: Command = serde_json::from_str(r#"{"type":"export"}"#).unwrap();
        assert_eq!(command, Command::Export);
    }
}
