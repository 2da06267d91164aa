//! Composite parameter parsers. `filters` and `options` may arrive as a
//! single comma-separated string; unknown keys are warnings, not errors.

use crate::entities::query::{SearchFilters, SearchOptions};

/// Parse a `filters` string like
/// `"year:2020-2025, age:aged, sex:female, clinical:therapy"`.
pub fn parse_filters(raw: Option<&str>) -> (SearchFilters, Vec<String>) {
    let mut filters = SearchFilters::default();
    let mut warnings = Vec::new();
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return (filters, warnings);
    };

    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, value)) = part.split_once(':') else {
            warnings.push(format!("ignoring filter without key:value form: \"{part}\""));
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "year" => parse_year_range(value, &mut filters),
            "age" | "age_group" => filters.age_group = Some(value.to_ascii_lowercase()),
            "sex" => filters.sex = Some(normalize_sex(value)),
            "species" => filters.species = Some(value.to_ascii_lowercase()),
            "lang" | "language" => filters.language = Some(value.to_ascii_lowercase()),
            "clinical" | "clinical_query" => {
                filters.clinical_query = Some(value.to_ascii_lowercase())
            }
            "type" | "article_type" => filters
                .article_types
                .push(value.to_ascii_lowercase()),
            "min_citations" => {
                filters.min_citations = value.parse::<u64>().ok();
            }
            other => warnings.push(format!("unknown filter key \"{other}\"")),
        }
    }
    (filters, warnings)
}

fn normalize_sex(value: &str) -> String {
    match value.to_ascii_lowercase().as_str() {
        "f" => "female".to_string(),
        "m" => "male".to_string(),
        other => other.to_string(),
    }
}

fn parse_year_range(value: &str, filters: &mut SearchFilters) {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    match compact.split_once('-') {
        Some((from, to)) => {
            filters.min_year = from.parse::<i32>().ok();
            filters.max_year = to.parse::<i32>().ok();
        }
        None => {
            filters.min_year = compact.parse::<i32>().ok();
        }
    }
}

/// Parse an `options` string like `"preprints, shallow, no_oa"` onto the
/// default option set. Flags not mentioned keep their defaults.
pub fn parse_options(raw: Option<&str>) -> (SearchOptions, Vec<String>) {
    let mut options = SearchOptions::default();
    let mut warnings = Vec::new();
    let Some(raw) = raw.map(str::trim).filter(|v| !v.is_empty()) else {
        return (options, warnings);
    };

    for part in raw.split(',') {
        let flag = part.trim().to_ascii_lowercase();
        if flag.is_empty() {
            continue;
        }
        match flag.as_str() {
            "preprints" => options.include_preprints = true,
            "shallow" => options.deep_search = false,
            "all_types" | "no_peer_review" => options.peer_reviewed_only = false,
            "no_oa" => options.include_oa_links = false,
            "no_analysis" => options.show_analysis = false,
            "no_scores" => options.include_similarity_scores = false,
            "no_relax" => options.auto_relax = false,
            other => warnings.push(format!("unknown option flag \"{other}\"")),
        }
    }
    (options, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_and_empty_return_defaults() {
        let (filters, warnings) = parse_filters(None);
        assert!(filters.is_empty());
        assert!(warnings.is_empty());
        let (filters, _) = parse_filters(Some(""));
        assert!(filters.is_empty());
        let (options, _) = parse_options(None);
        assert_eq!(options, SearchOptions::default());
    }

    #[test]
    fn year_range_variants() {
        let (f, _) = parse_filters(Some("year:2020-2025"));
        assert_eq!(f.min_year, Some(2020));
        assert_eq!(f.max_year, Some(2025));

        let (f, _) = parse_filters(Some("year:2020-"));
        assert_eq!(f.min_year, Some(2020));
        assert_eq!(f.max_year, None);

        let (f, _) = parse_filters(Some("year:-2025"));
        assert_eq!(f.min_year, None);
        assert_eq!(f.max_year, Some(2025));

        let (f, _) = parse_filters(Some("year:2024"));
        assert_eq!(f.min_year, Some(2024));
        assert_eq!(f.max_year, None);
    }

    #[test]
    fn invalid_year_is_ignored() {
        let (f, _) = parse_filters(Some("year:abc"));
        assert_eq!(f.min_year, None);
        assert_eq!(f.max_year, None);
    }

    #[test]
    fn filter_keys_and_aliases() {
        let (f, _) = parse_filters(Some(
            "age:aged, sex:f, species:humans, lang:English, clinical:therapy",
        ));
        assert_eq!(f.age_group.as_deref(), Some("aged"));
        assert_eq!(f.sex.as_deref(), Some("female"));
        assert_eq!(f.species.as_deref(), Some("humans"));
        assert_eq!(f.language.as_deref(), Some("english"));
        assert_eq!(f.clinical_query.as_deref(), Some("therapy"));

        let (f, _) = parse_filters(Some("age_group:child, language:chinese, clinical_query:diagnosis_narrow"));
        assert_eq!(f.age_group.as_deref(), Some("child"));
        assert_eq!(f.language.as_deref(), Some("chinese"));
        assert_eq!(f.clinical_query.as_deref(), Some("diagnosis_narrow"));
    }

    #[test]
    fn whitespace_is_tolerated() {
        let (f, _) = parse_filters(Some("  year : 2020 - 2025 , age : aged  "));
        assert_eq!(f.min_year, Some(2020));
        assert_eq!(f.max_year, Some(2025));
        assert_eq!(f.age_group.as_deref(), Some("aged"));
    }

    #[test]
    fn empty_value_and_missing_colon_are_skipped() {
        let (f, warnings) = parse_filters(Some("age:, something_weird, sex:male"));
        assert!(f.age_group.is_none());
        assert_eq!(f.sex.as_deref(), Some("male"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn unknown_filter_key_is_warning_not_error() {
        let (f, warnings) = parse_filters(Some("year:2020, color:blue"));
        assert_eq!(f.min_year, Some(2020));
        assert!(warnings[0].contains("color"));
    }

    #[test]
    fn option_flags_apply_over_defaults() {
        let (o, _) = parse_options(Some("preprints, shallow, no_oa"));
        assert!(o.include_preprints);
        assert!(!o.deep_search);
        assert!(!o.include_oa_links);
        // Untouched flags keep defaults.
        assert!(o.show_analysis);
        assert!(o.auto_relax);
    }

    #[test]
    fn option_aliases_and_case() {
        let (o, _) = parse_options(Some("PREPRINTS, All_Types"));
        assert!(o.include_preprints);
        assert!(!o.peer_reviewed_only);
        let (o, _) = parse_options(Some("no_peer_review, no_scores, no_relax, no_analysis"));
        assert!(!o.peer_reviewed_only);
        assert!(!o.include_similarity_scores);
        assert!(!o.auto_relax);
        assert!(!o.show_analysis);
    }

    #[test]
    fn unknown_option_flag_is_warning() {
        let (o, warnings) = parse_options(Some("preprints, unknown_flag"));
        assert!(o.include_preprints);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("unknown_flag"));
    }
}
