use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::case_record::{CaseRecord, CaseType};

pub const SEARCH_RESULT_LIMIT: usize = 10;
pub const TOP_TAG_LIMIT: usize = 5;

/// Ranks records matching `term` (a profile id or part of a display name).
///
/// An exact id match wins outright. Otherwise a record matches when its id
/// contains the term, or when every word of the term prefixes some word of the
/// display name. Results are ordered exact id, exact name, then most recent
/// thread first.
pub fn search_records<'a>(records: &'a [CaseRecord], term: &str) -> Vec<&'a CaseRecord> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return Vec::new();
    }

    let exact = records
        .iter()
        .filter(|record| record.profile_id.to_lowercase() == term)
        .collect::<Vec<_>>();
    let mut matches = if exact.is_empty() {
        let term_words = split_name_words(&term);
        records
            .iter()
            .filter(|record| {
                if record.profile_id.to_lowercase().contains(&term) {
                    return true;
                }
                let name = record.display_name.to_lowercase();
                let name_words = split_name_words(&name);
                !term_words.is_empty()
                    && term_words.iter().all(|term_word| {
                        name_words
                            .iter()
                            .any(|name_word| name_word.starts_with(term_word))
                    })
            })
            .collect::<Vec<_>>()
    } else {
        exact
    };

    matches.sort_by(|left, right| {
        let left_key = search_rank(left, &term);
        let right_key = search_rank(right, &term);
        right_key.cmp(&left_key)
    });
    matches
}

fn search_rank(record: &CaseRecord, term: &str) -> (bool, bool, Option<DateTime<Utc>>) {
    (
        record.profile_id.to_lowercase() == term,
        record.display_name.to_lowercase() == term,
        record.latest_thread_at(),
    )
}

fn split_name_words(text: &str) -> Vec<&str> {
    text.split(|ch: char| ch.is_whitespace() || ch == '_' || ch == '-')
        .filter(|word| !word.is_empty())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Today,
    Week,
    Month,
    All,
}

impl StatsPeriod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "today" => Some(Self::Today),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "last 7 days",
            Self::Month => "last 30 days",
            Self::All => "all time",
        }
    }

    /// Inclusive lower bound for a record's first thread date.
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Today => {
                let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
                Some(Utc.from_utc_datetime(&midnight))
            }
            Self::Week => Some(now - Duration::days(7)),
            Self::Month => Some(now - Duration::days(30)),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseStatistics {
    pub period: StatsPeriod,
    pub total: usize,
    pub suspects: usize,
    pub banned: usize,
    /// Tag ids of first threads with their counts, most used first.
    pub top_tags: Vec<(String, usize)>,
}

impl CaseStatistics {
    /// Banned per hundred suspects, rounded; zero without suspects.
    pub fn banned_ratio_percent(&self) -> u64 {
        if self.suspects == 0 {
            return 0;
        }
        ((self.banned as f64 / self.suspects as f64) * 100.0).round() as u64
    }
}

/// Counts records whose first thread falls in `period`.
pub fn case_statistics(
    records: &[CaseRecord],
    period: StatsPeriod,
    now: DateTime<Utc>,
) -> CaseStatistics {
    let since = period.since(now);
    let mut stats = CaseStatistics {
        period,
        total: 0,
        suspects: 0,
        banned: 0,
        top_tags: Vec::new(),
    };
    let mut tag_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        let Some(first_thread) = record.first_thread() else {
            continue;
        };
        if since.is_some_and(|since| first_thread.created_at < since) {
            continue;
        }
        stats.total += 1;
        match record.case_type {
            CaseType::Suspect => stats.suspects += 1,
            CaseType::Banned => stats.banned += 1,
        }
        for tag in &first_thread.tags {
            *tag_counts.entry(tag.as_str()).or_default() += 1;
        }
    }

    let mut ranked = tag_counts
        .into_iter()
        .map(|(tag, count)| (tag.to_string(), count))
        .collect::<Vec<_>>();
    ranked.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
    ranked.truncate(TOP_TAG_LIMIT);
    stats.top_tags = ranked;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case_record::ThreadEntry;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp")
    }

    fn record(
        profile_id: &str,
        name: &str,
        case_type: CaseType,
        created: i64,
        tags: &[&str],
    ) -> CaseRecord {
        let tags = tags.iter().map(|tag| tag.to_string()).collect::<Vec<_>>();
        CaseRecord::new(
            profile_id,
            name,
            case_type,
            ThreadEntry::new(format!("t-{profile_id}"), &tags, at(created)),
        )
    }

    #[test]
    fn functional_search_prefers_exact_id_over_partial_matches() {
        let records = vec![
            record("usr_abc", "Other", CaseType::Suspect, 10, &[]),
            record("usr_abc2", "Another", CaseType::Suspect, 20, &[]),
        ];
        let results = search_records(&records, "USR_ABC");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].profile_id, "usr_abc");
    }

    #[test]
    fn functional_search_matches_word_prefixes_and_ranks_exact_name_then_recency() {
        let records = vec![
            record("usr_1", "Dark Knight", CaseType::Suspect, 10, &[]),
            record("usr_2", "dark", CaseType::Suspect, 5, &[]),
            record("usr_3", "Darkness_Rising", CaseType::Banned, 30, &[]),
            record("usr_4", "Light", CaseType::Suspect, 40, &[]),
        ];
        let results = search_records(&records, "dark");
        let ids = results
            .iter()
            .map(|record| record.profile_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["usr_2", "usr_3", "usr_1"]);

        let multi = search_records(&records, "dark kn");
        assert_eq!(multi.len(), 1);
        assert_eq!(multi[0].profile_id, "usr_1");
        assert!(search_records(&records, "   ").is_empty());
    }

    #[test]
    fn functional_search_matches_id_substring() {
        let records = vec![record("usr_deadbeef", "Someone", CaseType::Suspect, 1, &[])];
        assert_eq!(search_records(&records, "beef").len(), 1);
    }

    #[test]
    fn functional_statistics_filter_by_first_thread_and_rank_tags() {
        let now = at(40 * 86_400);
        let records = vec![
            record("usr_1", "A", CaseType::Suspect, 39 * 86_400, &["toxic", "spam"]),
            record("usr_2", "B", CaseType::Suspect, 38 * 86_400, &["toxic"]),
            record("usr_3", "C", CaseType::Banned, 37 * 86_400, &["crash"]),
            record("usr_4", "D", CaseType::Banned, 86_400, &["toxic"]),
        ];

        let week = case_statistics(&records, StatsPeriod::Week, now);
        assert_eq!(week.total, 3);
        assert_eq!(week.suspects, 2);
        assert_eq!(week.banned, 1);
        assert_eq!(week.banned_ratio_percent(), 50);
        assert_eq!(week.top_tags[0], ("toxic".to_string(), 2));
        assert_eq!(week.top_tags.len(), 3);

        let all = case_statistics(&records, StatsPeriod::All, now);
        assert_eq!(all.total, 4);
        assert_eq!(all.banned_ratio_percent(), 100);
    }

    #[test]
    fn unit_statistics_ratio_is_zero_without_suspects_and_skip_threadless_records() {
        let mut empty = record("usr_1", "A", CaseType::Banned, 10, &[]);
        empty.threads.clear();
        let records = vec![empty, record("usr_2", "B", CaseType::Banned, 10, &[])];
        let stats = case_statistics(&records, StatsPeriod::All, at(20));
        assert_eq!(stats.total, 1);
        assert_eq!(stats.banned_ratio_percent(), 0);
    }

    #[test]
    fn unit_today_starts_at_utc_midnight() {
        let now = at(86_400 * 3 + 3_600);
        assert_eq!(StatsPeriod::Today.since(now), Some(at(86_400 * 3)));
        assert_eq!(StatsPeriod::All.since(now), None);
        assert_eq!(StatsPeriod::parse("Week"), Some(StatsPeriod::Week));
        assert_eq!(StatsPeriod::parse("year"), None);
    }
}
