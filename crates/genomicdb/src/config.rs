use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const PAGE_KIB_CHOICES: [usize; 7] = [1, 2, 4, 8, 16, 32, 64];

/// Connection configuration, merged over hard-coded defaults from a JSON
/// object. Unknown keys are tolerated (optional transport layers read
/// their own), wrong types and out-of-range values are not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Disable inner journaling and synchronous writes for bulk loads.
    /// A crash while loading can corrupt the database.
    pub unsafe_load: bool,
    /// Open read-only without any locking.
    pub immutable: bool,
    #[serde(rename = "page_cache_MiB")]
    pub page_cache_mib: usize,
    /// Worker threads; -1 picks the hardware default, capped at 8.
    pub threads: i32,
    /// Enable read-ahead even for inner pages below 16 KiB.
    pub force_prefetch: bool,
    /// Compressor level for newly written pages.
    pub zstd_level: i32,
    #[serde(rename = "inner_page_KiB")]
    pub inner_page_kib: usize,
    #[serde(rename = "outer_page_KiB")]
    pub outer_page_kib: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unsafe_load: false,
            immutable: false,
            page_cache_mib: 1024,
            threads: -1,
            force_prefetch: false,
            zstd_level: 6,
            inner_page_kib: 16,
            outer_page_kib: 32,
        }
    }
}

impl Config {
    /// Parses a JSON object over the defaults. `None`, `""` and `"{}"` all
    /// yield the defaults.
    pub fn from_json(json: Option<&str>) -> Result<Self> {
        let config = match json {
            None => Self::default(),
            Some(text) if text.trim().is_empty() => Self::default(),
            Some(text) => {
                let value: serde_json::Value = serde_json::from_str(text)?;
                if !value.is_object() {
                    return Err(Error::Config(
                        "configuration must be a JSON object".to_string(),
                    ));
                }
                serde_json::from_value(value)?
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !PAGE_KIB_CHOICES.contains(&self.inner_page_kib) {
            return Err(Error::Config(format!(
                "inner_page_KiB {} not one of {PAGE_KIB_CHOICES:?}",
                self.inner_page_kib
            )));
        }
        if !PAGE_KIB_CHOICES.contains(&self.outer_page_kib) {
            return Err(Error::Config(format!(
                "outer_page_KiB {} not one of {PAGE_KIB_CHOICES:?}",
                self.outer_page_kib
            )));
        }
        if !(-7..=22).contains(&self.zstd_level) {
            return Err(Error::Config(format!(
                "zstd_level {} out of range -7..=22",
                self.zstd_level
            )));
        }
        if self.page_cache_mib == 0 {
            return Err(Error::Config("page_cache_MiB must be positive".to_string()));
        }
        if self.unsafe_load && self.immutable {
            return Err(Error::Config(
                "unsafe_load and immutable are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("config serializes")
    }

    /// The hard-coded defaults as JSON, for `default_config_json()`.
    pub fn default_json() -> String {
        Self::default().to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let json = Config::default_json();
        assert_eq!(Config::from_json(Some(&json)).unwrap(), Config::default());
        assert!(json.contains("\"page_cache_MiB\":1024"));
        assert!(json.contains("\"inner_page_KiB\":16"));
        assert!(json.contains("\"threads\":-1"));
    }

    #[test]
    fn partial_object_merges_over_defaults() {
        let config = Config::from_json(Some(r#"{"zstd_level": 3, "threads": 2}"#)).unwrap();
        assert_eq!(config.zstd_level, 3);
        assert_eq!(config.threads, 2);
        assert_eq!(config.inner_page_kib, 16);
        assert!(!config.unsafe_load);
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let config =
            Config::from_json(Some(r#"{"web_dbi_url": "https://x", "unsafe_load": true}"#))
                .unwrap();
        assert!(config.unsafe_load);
    }

    #[test]
    fn bad_values_are_config_errors() {
        for json in [
            r#"{"inner_page_KiB": 3}"#,
            r#"{"outer_page_KiB": 128}"#,
            r#"{"zstd_level": 99}"#,
            r#"{"page_cache_MiB": 0}"#,
            r#"{"threads": "four"}"#,
            r#"{"unsafe_load": true, "immutable": true}"#,
            r#"[1, 2]"#,
        ] {
            assert!(
                matches!(Config::from_json(Some(json)), Err(Error::Config(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn empty_inputs_mean_defaults() {
        assert_eq!(Config::from_json(None).unwrap(), Config::default());
        assert_eq!(Config::from_json(Some("  ")).unwrap(), Config::default());
        assert_eq!(Config::from_json(Some("{}")).unwrap(), Config::default());
    }
}
