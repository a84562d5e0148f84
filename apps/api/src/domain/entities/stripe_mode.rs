use serde::{Deserialize, Serialize};

/// Which Stripe account credentials an invoice was created against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "stripe_mode", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StripeMode {
    #[default]
    Sandbox,
    Live,
}

impl StripeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StripeMode::Sandbox => "sandbox",
            StripeMode::Live => "live",
        }
    }

    pub fn is_sandbox(&self) -> bool {
        matches!(self, StripeMode::Sandbox)
    }

    /// Live keys start with sk_live_, pk_live_ or rk_live_; everything else is sandbox.
    pub fn from_key_prefix(key: &str) -> Self {
        if ["sk_live_", "pk_live_", "rk_live_"]
            .iter()
            .any(|prefix| key.starts_with(prefix))
        {
            StripeMode::Live
        } else {
            StripeMode::Sandbox
        }
    }

    pub fn validate_key_prefix(&self, key: &str, key_name: &str) -> Result<(), String> {
        let detected = Self::from_key_prefix(key);
        if detected != *self {
            Err(format!(
                "{key_name} has a {detected} key prefix but {self} mode was expected"
            ))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Display for StripeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StripeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" | "test" => Ok(StripeMode::Sandbox),
            "live" => Ok(StripeMode::Live),
            _ => Err(format!(
                "Invalid stripe mode: {s}. Must be 'sandbox' or 'live'"
            )),
        }
    }
}
