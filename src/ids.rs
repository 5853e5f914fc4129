use rand::Rng as _;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generates a record ID: base36 milliseconds followed by a random base36
/// suffix. Not a UUID; two IDs minted in the same millisecond only differ by
/// the suffix.
pub fn generate_id() -> String {
    let millis = u64::try_from(now_millis()).unwrap_or_default();
    let suffix: u64 = rand::thread_rng().gen_range(36u64.pow(8)..36u64.pow(11));
    format!("{}{}", to_base36(millis), to_base36(suffix))
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_owned();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn base36_matches_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }

    #[test]
    fn generated_ids_are_lowercase_alphanumeric_and_distinct() {
        let ids = (0..500).map(|_| generate_id()).collect::<Vec<_>>();
        for id in &ids {
            assert!(id.len() >= 16, "{id}");
            assert!(id.bytes().all(|b| BASE36.contains(&b)), "{id}");
        }
        let unique = ids.iter().collect::<HashSet<_>>();
        assert_eq!(unique.len(), ids.len());
    }
}
