use std::env;

/// Deployment flavour, selects the log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    /// Reads `ENVIRONMENT`, falling back to development for unset or unknown values.
    pub fn from_env() -> Self {
        env::var("ENVIRONMENT")
            .ok()
            .and_then(|value| Self::try_from(value.as_str()).ok())
            .unwrap_or(Environment::Development)
    }
}

impl TryFrom<&str> for Environment {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `development` or `production`.",
                other
            )),
        }
    }
}
