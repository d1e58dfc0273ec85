//! Record and dataset fixtures sized for realistic runs.

use crate::record::{Dataset, DatasetKind, Record};

/// A standings record for the given team, keyed on a fixed season and
/// competition.
#[must_use]
pub fn standings_record(team: &str, points: usize) -> Record {
    Record::new()
        .with("season", "2024-2025")
        .with("competition", "premier-division")
        .with("team", team)
        .with("points", points)
        .with("scraped_at", "2025-02-22T18:30:00+00:00")
}

/// A match record keyed on its URL.
#[must_use]
pub fn match_record(url: &str) -> Record {
    Record::new()
        .with("match_url", url)
        .with("home_score", 2)
        .with("away_score", 1)
        .with("scraped_at", "2025-02-22T18:30:00+00:00")
}

/// A standings dataset of `size` distinct teams.
#[must_use]
pub fn standings_table(size: usize) -> Dataset {
    Dataset::from_records(
        DatasetKind::Standings,
        (0..size)
            .map(|i| standings_record(&format!("team-{i:04}"), i))
            .collect(),
    )
}

/// A matches dataset of `size` distinct fixtures.
#[must_use]
pub fn matches_table(size: usize) -> Dataset {
    Dataset::from_records(
        DatasetKind::Matches,
        (0..size).map(|i| match_record(&format!("/m/{i}"))).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DatasetKind;

    #[test]
    fn test_fixture_keys_are_distinct() {
        let table = standings_table(50);
        let spec = DatasetKind::Standings.key_spec();
        let mut keys: Vec<String> = table
            .records()
            .iter()
            .map(|r| spec.key_of(r).unwrap().to_string())
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 50);
    }

    #[test]
    fn test_match_fixture_is_keyable() {
        let spec = DatasetKind::Matches.key_spec();
        let key = spec.key_of(&match_record("/m/42")).unwrap();
        assert_eq!(key.to_string(), "/m/42");
    }
}
