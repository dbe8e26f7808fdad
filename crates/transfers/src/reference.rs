//! Human-readable transfer reference codes.
//!
//! Format: `TRF-{SRC}-{DST}-{YYYYMMDD}-{SUFFIX}`, e.g. `TRF-WH01-KA014321-20261016-7QX2`.

use chrono::NaiveDate;
use rand::Rng;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SUFFIX_LEN: usize = 4;
const MAX_CODE_SEGMENT: usize = 8;

pub fn reference_code(source_code: &str, destination_code: &str, date: NaiveDate, suffix: &str) -> String {
    format!(
        "TRF-{}-{}-{}-{}",
        segment(source_code),
        segment(destination_code),
        date.format("%Y%m%d"),
        suffix
    )
}

pub fn random_suffix() -> String {
    suffix_from(&mut rand::thread_rng())
}

fn suffix_from<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

fn segment(code: &str) -> String {
    let cleaned: String = code
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .take(MAX_CODE_SEGMENT)
        .collect();
    if cleaned.is_empty() { "LOC".to_string() } else { cleaned }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_code_normalizes_location_codes() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(
            reference_code("wh-01", "KA 01 4321 xyz", date, "AB12"),
            "TRF-WH01-KA014321-20261016-AB12"
        );
        assert_eq!(reference_code("--", "T1", date, "ZZZZ"), "TRF-LOC-T1-20261016-ZZZZ");
    }

    #[test]
    fn suffix_uses_unambiguous_alphabet() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
    }

    #[test]
    fn suffixes_cover_the_whole_alphabet() {
        use rand::SeedableRng;

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2_000 {
            seen.extend(suffix_from(&mut rng).bytes());
        }
        assert_eq!(seen.len(), SUFFIX_ALPHABET.len());
        assert!(!seen.contains(&b'O') && !seen.contains(&b'0'));
    }
}
