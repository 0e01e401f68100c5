use crate::case_record::CaseRecord;

/// Names scoring strictly above this are reported as likely the same person.
pub const NEAR_DUPLICATE_THRESHOLD: f64 = 0.8;

/// Edit distance counted over Unicode scalar values.
pub fn levenshtein_distance(left: &str, right: &str) -> usize {
    let left = left.chars().collect::<Vec<_>>();
    let right = right.chars().collect::<Vec<_>>();
    if left.is_empty() {
        return right.len();
    }
    if right.is_empty() {
        return left.len();
    }

    let mut previous = (0..=right.len()).collect::<Vec<_>>();
    let mut current = vec![0; right.len() + 1];
    for (i, left_char) in left.iter().enumerate() {
        current[0] = i + 1;
        for (j, right_char) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(left_char != right_char);
            let insertion = current[j] + 1;
            let deletion = previous[j + 1] + 1;
            current[j + 1] = substitution.min(insertion).min(deletion);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[right.len()]
}

/// `(longest - distance) / longest`; identical strings (including two empty ones) score 1.
pub fn similarity(left: &str, right: &str) -> f64 {
    if left == right {
        return 1.0;
    }
    let longest = left.chars().count().max(right.chars().count());
    if longest == 0 {
        return 1.0;
    }
    let distance = levenshtein_distance(left, right);
    (longest - distance) as f64 / longest as f64
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearDuplicatePair {
    pub first_profile_id: String,
    pub first_name: String,
    pub second_profile_id: String,
    pub second_name: String,
    pub similarity: f64,
}

/// Pairs of distinct records whose lowercased names score above `threshold`.
pub fn near_duplicate_pairs(records: &[CaseRecord], threshold: f64) -> Vec<NearDuplicatePair> {
    let lowered = records
        .iter()
        .map(|record| record.display_name.to_lowercase())
        .collect::<Vec<_>>();
    let mut pairs = Vec::new();
    for (i, first) in records.iter().enumerate() {
        for (j, second) in records.iter().enumerate().skip(i + 1) {
            if first.profile_id == second.profile_id {
                continue;
            }
            let score = similarity(&lowered[i], &lowered[j]);
            if score > threshold {
                pairs.push(NearDuplicatePair {
                    first_profile_id: first.profile_id.clone(),
                    first_name: first.display_name.clone(),
                    second_profile_id: second.profile_id.clone(),
                    second_name: second.display_name.clone(),
                    similarity: score,
                });
            }
        }
    }
    pairs
}
