use rand::Rng;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Contributor;

const JITTER: u64 = 1000;

/// Largest id a browser can round-trip through a JS number (2^53 - 1).
pub const MAX_SAFE_ID: u64 = (1 << 53) - 1;

/// Timestamp (ms) plus random jitter, bumped past any id already taken in the
/// city's list. Ids are only ever addressed together with their city.
pub fn next_id(taken: &[Contributor]) -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let mut candidate = millis + rand::thread_rng().gen_range(0..JITTER);
    while taken.iter().any(|c| c.id == candidate) {
        candidate += 1;
    }
    candidate
}

/// Replacement id for a stored contributor that has none. Depends only on the
/// list position and the ids already reserved, so repeated loads of the same
/// blob hand out the same ids.
pub fn derived_id(position: usize, taken: &mut HashSet<u64>) -> u64 {
    let mut candidate = position as u64 + 1;
    while !taken.insert(candidate) {
        candidate += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_taken_ids() {
        let mut taken: Vec<Contributor> = Vec::new();
        for _ in 0..50 {
            let id = next_id(&taken);
            assert!(taken.iter().all(|c| c.id != id));
            taken.push(Contributor {
                id,
                name: "x".into(),
                quantity: 1,
                verified: false,
            });
        }
    }

    #[test]
    fn derived_ids_avoid_reserved_and_repeat() {
        let reserved: HashSet<u64> = [1, 2, 4].into_iter().collect();

        let mut taken = reserved.clone();
        let first: Vec<u64> = (0..3).map(|pos| derived_id(pos, &mut taken)).collect();
        assert_eq!(first, vec![3, 5, 6]);

        let mut taken = reserved;
        let again: Vec<u64> = (0..3).map(|pos| derived_id(pos, &mut taken)).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn generated_ids_fit_in_a_js_number() {
        assert!(next_id(&[]) <= MAX_SAFE_ID);
    }
}
