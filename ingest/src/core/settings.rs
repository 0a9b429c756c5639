use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SETTINGS_KEY: &str = "news_retell";
pub const FULL_RATIO: u8 = 100;

/// Process-wide AI stage configuration, edited from the admin UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetellSettings {
    pub retell_enabled: bool,
    pub dialogue_enabled: bool,
    pub tweets_enabled: bool,
    pub default_model: String,
    pub dialogue_count: u32,
    pub tweet_count: u32,
    /// Ratio used for countries without their own entry.
    pub default_ratio: u8,
    /// Percentage of newly inserted items that get AI processing, by country code.
    pub country_ratios: HashMap<String, u8>,
}

impl Default for RetellSettings {
    fn default() -> Self {
        Self {
            retell_enabled: true,
            dialogue_enabled: true,
            tweets_enabled: false,
            default_model: "google/gemini-2.5-flash".to_string(),
            dialogue_count: 6,
            tweet_count: 3,
            default_ratio: FULL_RATIO,
            country_ratios: HashMap::new(),
        }
    }
}

impl RetellSettings {
    pub fn ratio_for(&self, country_code: &str) -> u8 {
        self.country_ratios
            .get(&country_code.to_lowercase())
            .copied()
            .unwrap_or(self.default_ratio)
            .min(FULL_RATIO)
    }

    pub fn is_full_ratio(&self, country_code: &str) -> bool {
        self.ratio_for(country_code) == FULL_RATIO
    }

    /// Bernoulli draw against the country's ratio.
    pub fn sample(&self, country_code: &str) -> bool {
        let roll = rand::thread_rng().gen_range(0.0..100.0);
        passes_ratio(self.ratio_for(country_code), roll)
    }
}

/// `roll` is uniform in `[0, 100)`.
pub fn passes_ratio(ratio: u8, roll: f64) -> bool {
    roll < f64::from(ratio)
}

/// Target language for generated dialogue, from the feed's country.
pub fn language_for_country(country_code: &str) -> &'static str {
    match country_code.to_lowercase().as_str() {
        "ua" => "uk",
        "pl" => "pl",
        "in" => "hi",
        _ => "en",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_bounds_are_exact() {
        assert!(passes_ratio(100, 99.999));
        assert!(!passes_ratio(0, 0.0));
        assert!(passes_ratio(30, 29.5));
        assert!(!passes_ratio(30, 30.0));
    }

    #[test]
    fn sampling_extremes_are_deterministic() {
        let mut settings = RetellSettings::default();
        settings.country_ratios.insert("ua".to_string(), 100);
        settings.country_ratios.insert("pl".to_string(), 0);

        for _ in 0..200 {
            assert!(settings.sample("ua"));
            assert!(!settings.sample("pl"));
        }
    }

    #[test]
    fn unknown_countries_use_default_ratio() {
        let settings = RetellSettings {
            default_ratio: 40,
            ..RetellSettings::default()
        };
        assert_eq!(settings.ratio_for("us"), 40);
        assert!(!settings.is_full_ratio("us"));
    }

    #[test]
    fn country_lookup_is_case_insensitive_and_capped() {
        let mut settings = RetellSettings::default();
        settings.country_ratios.insert("in".to_string(), 250);
        assert_eq!(settings.ratio_for("IN"), 100);
    }

    #[test]
    fn maps_country_to_dialogue_language() {
        assert_eq!(language_for_country("ua"), "uk");
        assert_eq!(language_for_country("PL"), "pl");
        assert_eq!(language_for_country("in"), "hi");
        assert_eq!(language_for_country("us"), "en");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings: RetellSettings =
            serde_json::from_str(r#"{"country_ratios":{"ua":50},"tweets_enabled":true}"#).unwrap();
        assert_eq!(settings.ratio_for("ua"), 50);
        assert!(settings.tweets_enabled);
        assert!(settings.retell_enabled);
        assert_eq!(settings.dialogue_count, 6);
    }
}
