use tracing::info;

/// Environment variable selecting the runtime mode.
pub const ENV_VAR: &str = "TIMELINE_ENV";

/// Analyser runtime configuration.
///
/// Production (the default) isolates module failures and maps resolution
/// failures to a generic fault. Development lets both propagate unchanged.
#[derive(Debug, Clone, Default)]
pub struct AnalyserConfig {
    pub development: bool,
}

impl AnalyserConfig {
    pub fn production() -> Self {
        Self { development: false }
    }

    pub fn development() -> Self {
        Self { development: true }
    }

    /// Load from `TIMELINE_ENV` (`development` or `dev` enables development mode).
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mode = std::env::var(ENV_VAR).unwrap_or_default();
        let config = Self {
            development: is_development(&mode),
        };

        info!(
            mode = if mode.is_empty() { "<not set>" } else { mode.as_str() },
            development = config.development,
            "Analyser config loaded"
        );
        config
    }
}

fn is_development(mode: &str) -> bool {
    matches!(
        mode.trim().to_ascii_lowercase().as_str(),
        "development" | "dev"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_production() {
        assert!(!AnalyserConfig::default().development);
        assert!(!AnalyserConfig::production().development);
    }

    #[test]
    fn recognises_development_spellings() {
        assert!(is_development("development"));
        assert!(is_development(" DEV "));
        assert!(!is_development("production"));
        assert!(!is_development(""));
    }
}
