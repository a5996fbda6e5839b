use genie_core::catalog::validate_options;
use genie_core::{Error, OptionCatalog, Result, VisaOption};
use std::path::{Path, PathBuf};

/// Catalog read from a JSON array of options on every lookup, so edits to the file are
/// picked up without a restart.
#[derive(Debug, Clone)]
pub struct JsonFileCatalog {
    path: PathBuf,
}

impl JsonFileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OptionCatalog for JsonFileCatalog {
    fn options(&self) -> Result<Vec<VisaOption>> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Catalog(format!("{}: {e}", self.path.display())))?;
        let options: Vec<VisaOption> = serde_json::from_str(&raw)
            .map_err(|e| Error::Catalog(format!("{}: {e}", self.path.display())))?;
        validate_options(&options)?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genie_core::matcher::fetch_options;

    const CATALOG: &str = r#"[
      {"name": "Irish Critical Skills Employment Permit", "costUsd": 1100,
       "minEducation": "Bachelor's degree", "minWorkExperience": "None for listed occupations",
       "processingTime": "6-8 weeks", "successRatePercent": 70},
      {"name": "Portugal Tech Visa", "costUsd": 600,
       "minEducation": "Bachelor's degree", "minWorkExperience": "1 year",
       "processingTime": "2-3 months", "successRatePercent": 65}
    ]"#;

    #[test]
    fn reads_options_from_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("catalog.json");
        std::fs::write(&p, CATALOG).unwrap();
        let c = JsonFileCatalog::new(&p);
        let all = c.options().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].cost_usd, 600.0);

        let matched = fetch_options(&c, 1000.0, "software developer");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "Portugal Tech Visa");
    }

    #[test]
    fn missing_or_invalid_files_are_catalog_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = JsonFileCatalog::new(tmp.path().join("nope.json"));
        assert!(matches!(missing.options(), Err(Error::Catalog(_))));

        let p = tmp.path().join("bad.json");
        std::fs::write(&p, r#"[{"name": "X", "costUsd": -5, "minEducation": "", "minWorkExperience": "", "processingTime": "", "successRatePercent": 50}]"#).unwrap();
        assert!(JsonFileCatalog::new(&p).options().is_err());
        // The tool surface degrades to no options.
        assert!(fetch_options(&JsonFileCatalog::new(&p), 10_000.0, "tech").is_empty());
    }
}
