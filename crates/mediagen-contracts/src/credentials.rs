use std::fmt;

use serde_json::{Map, Value};

use crate::errors::GenerationError;
use crate::platforms::{CredentialRequirement, PlatformId};

/// A validated credential bag. The secret is kept out of `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    platform: PlatformId,
    secret: String,
    bag: Map<String, Value>,
}

impl Credentials {
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Extra, non-secret fields a platform may carry alongside the key.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.bag.get(name)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("platform", &self.platform)
            .field("secret", &"<redacted>")
            .field("fields", &self.bag.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Validates a raw credential bag before any request is issued.
///
/// Rejects a missing bag, a non-object, an empty object, a bag without the
/// platform's secret field, and a secret that is empty after trimming.
pub fn validate_credentials(
    platform: PlatformId,
    requirement: &CredentialRequirement,
    raw: Option<&Value>,
) -> Result<Credentials, GenerationError> {
    let Some(raw) = raw else {
        return Err(GenerationError::credential(
            platform,
            "no credentials configured",
        ));
    };
    let Some(bag) = raw.as_object() else {
        return Err(GenerationError::credential(
            platform,
            "credentials must be a key/value object",
        ));
    };
    if bag.is_empty() {
        return Err(GenerationError::credential(platform, "credentials are empty"));
    }
    let field = requirement.secret_field;
    let Some(secret) = bag.get(field) else {
        return Err(GenerationError::credential(
            platform,
            format!("missing '{field}'"),
        ));
    };
    let secret = match secret {
        Value::String(text) => text.trim(),
        _ => {
            return Err(GenerationError::credential(
                platform,
                format!("'{field}' must be a string"),
            ))
        }
    };
    if secret.is_empty() {
        return Err(GenerationError::credential(
            platform,
            format!("'{field}' is empty"),
        ));
    }

    let mut rest = bag.clone();
    rest.remove(field);
    Ok(Credentials {
        platform,
        secret: secret.to_string(),
        bag: rest,
    })
}
