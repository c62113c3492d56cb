use crate::error::{AppError, Result};
use crate::schedule::ScheduleRule;

use super::{IndexSource, Settings};

/// Validate loaded settings, reporting every issue at once.
pub fn validate_settings(settings: &Settings) -> Result<()> {
    let mut issues = Vec::new();

    validate_runtime(settings, &mut issues);
    validate_sources(settings, &mut issues);
    validate_aggregator(settings, &mut issues);
    validate_schedules(settings, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "updater config invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_runtime(settings: &Settings, issues: &mut Vec<String>) {
    if settings.tick_interval.is_zero() {
        issues.push("tick_interval_secs must be greater than zero".to_string());
    }
    if settings.store_path.as_os_str().is_empty() {
        issues.push("store_path must not be empty".to_string());
    }
    if settings.data_dir.as_os_str().is_empty() {
        issues.push("data_dir must not be empty".to_string());
    }
}

fn validate_sources(settings: &Settings, issues: &mut Vec<String>) {
    match &settings.index_source {
        IndexSource::Jpx { url } => validate_endpoint("index_source.url", url, issues),
        IndexSource::Csv { path } => {
            if path.as_os_str().is_empty() {
                issues.push("index_source.path must not be empty".to_string());
            }
        }
    }
    validate_endpoint("quote_endpoint", &settings.quote_endpoint, issues);
    validate_endpoint("history_endpoint", &settings.history_endpoint, issues);
}

fn validate_endpoint(name: &str, value: &str, issues: &mut Vec<String>) {
    let value = value.trim();
    if value.is_empty() {
        issues.push(format!("{name} must not be empty"));
    } else if !(value.starts_with("http://") || value.starts_with("https://")) {
        issues.push(format!("{name} must be an http(s) URL, found `{value}`"));
    }
}

fn validate_aggregator(settings: &Settings, issues: &mut Vec<String>) {
    let aggregator = &settings.aggregator;
    if aggregator.flush_threshold == 0 {
        issues.push("aggregator.flush_threshold must be greater than zero".to_string());
    }
    if aggregator.channel_capacity == 0 {
        issues.push("aggregator.channel_capacity must be greater than zero".to_string());
    }
    if aggregator.max_retained <= aggregator.flush_threshold {
        issues.push(format!(
            "aggregator.max_retained ({}) must exceed flush_threshold ({})",
            aggregator.max_retained, aggregator.flush_threshold
        ));
    }
}

fn validate_schedules(settings: &Settings, issues: &mut Vec<String>) {
    for (category, rule) in &settings.schedule_overrides {
        if let ScheduleRule::Interval { interval } = rule {
            if interval.is_zero() {
                issues.push(format!("schedule `{category}` interval must be non-zero"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::schedule::Category;

    #[test]
    fn builtin_settings_are_valid() {
        assert!(validate_settings(&Settings::builtin()).is_ok());
    }

    #[test]
    fn aggregates_all_issues() {
        let mut settings = Settings::builtin();
        settings.quote_endpoint = "ftp://example".to_string();
        settings.aggregator.flush_threshold = 0;
        settings.schedule_overrides.push((
            Category::Intraday,
            ScheduleRule::Interval {
                interval: Duration::ZERO,
            },
        ));

        let message = validate_settings(&settings).unwrap_err().to_string();
        assert!(message.contains("quote_endpoint"));
        assert!(message.contains("flush_threshold"));
        assert!(message.contains("schedule `intraday`"));
    }
}
