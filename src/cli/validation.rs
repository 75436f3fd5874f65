// validation.rs - Pre-run validation of command line inputs

use std::path::Path;

use regex::Regex;

use crate::core::extend::{parse_date, ExtendOptions};
use crate::error::{ArgrowError, Result};

/// Reject bad option combinations before anything is opened or mutated.
pub fn validate_extend_options(options: &ExtendOptions, date: &str) -> Result<()> {
    parse_date(date)?;
    if options.num_mismatches < 1 {
        return Err(ArgrowError::Config(
            "num-mismatches must be at least 1".to_string(),
        ));
    }
    if options.hmm_cost_threshold < 0.0 {
        return Err(ArgrowError::Config(
            "hmm-cost-threshold cannot be negative".to_string(),
        ));
    }
    if options.min_group_size < 1 {
        return Err(ArgrowError::Config(
            "min-group-size must be at least 1".to_string(),
        ));
    }
    if options.min_different_dates < 1 {
        return Err(ArgrowError::Config(
            "min-different-dates must be at least 1".to_string(),
        ));
    }
    if let Some(max) = options.max_daily_samples {
        if max == 0 {
            return Err(ArgrowError::Config(
                "max-daily-samples cannot be zero".to_string(),
            ));
        }
    }
    if !(options.likelihood_threshold > 0.0) {
        return Err(ArgrowError::Config(
            "likelihood threshold must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Require that an input path exists and is a file.
pub fn require_file<P: AsRef<Path>>(path: P, what: &str) -> Result<()> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ArgrowError::Config(format!(
            "{} not found: {}",
            what,
            path.display()
        )));
    }
    Ok(())
}

/// Compile optional include/exclude strain filters.
pub fn compile_filters(
    include: Option<&str>,
    exclude: Option<&str>,
) -> Result<(Option<Regex>, Option<Regex>)> {
    let compile = |pattern: &str| {
        Regex::new(pattern)
            .map_err(|e| ArgrowError::Config(format!("bad filter regex '{}': {}", pattern, e)))
    };
    Ok((
        include.map(compile).transpose()?,
        exclude.map(compile).transpose()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validates_defaults() {
        validate_extend_options(&ExtendOptions::default(), "2020-02-02").unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut options = ExtendOptions::default();
        options.num_mismatches = 0;
        assert!(validate_extend_options(&options, "2020-02-02").is_err());

        let mut options = ExtendOptions::default();
        options.hmm_cost_threshold = -1.0;
        assert!(validate_extend_options(&options, "2020-02-02").is_err());

        assert!(validate_extend_options(&ExtendOptions::default(), "02/02/2020").is_err());
    }

    #[test]
    fn test_compile_filters() {
        let (include, exclude) = compile_filters(Some("^SRR"), None).unwrap();
        assert!(include.unwrap().is_match("SRR123"));
        assert!(exclude.is_none());
        assert!(compile_filters(Some("("), None).is_err());
    }

    #[test]
    fn test_require_file() {
        let err = require_file("/nonexistent/thing", "alignment store").unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        assert!(err.to_string().contains("alignment store"));
    }
}
