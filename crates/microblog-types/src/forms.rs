use serde::{Deserialize, Serialize};

const REQUIRED: &str = "This field is required.";

/// Sign-in form as submitted by the browser (`application/x-www-form-urlencoded`).
///
/// Validation only checks that the fields are present. Nothing here
/// authenticates anyone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// HTML checkboxes are sent as `on` (or omitted entirely when unchecked).
    #[serde(default)]
    pub remember_me: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl LoginForm {
    pub fn remember_me(&self) -> bool {
        matches!(
            self.remember_me.as_deref().map(str::trim),
            Some("on" | "y" | "yes" | "true" | "1")
        )
    }

    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if self.username.trim().is_empty() {
            errors.push(FieldError { field: "username", message: REQUIRED });
        }
        if self.password.trim().is_empty() {
            errors.push(FieldError { field: "password", message: REQUIRED });
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}
