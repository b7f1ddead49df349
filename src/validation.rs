use once_cell::sync::Lazy;
use regex::Regex;

use crate::request::{CredentialRequest, Field, RequestKind};

// Syntactic filter only: lowercase local part, a domain, and a 2-4 letter TLD.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,4}$").expect("email pattern compiles")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// First required field that is missing or malformed for `kind`, if any.
pub fn missing_field(kind: RequestKind, request: &CredentialRequest) -> Option<Field> {
    kind.required_fields()
        .iter()
        .copied()
        .find(|field| match field {
            Field::User => !is_valid_email(&request.user),
            other => request.field(*other).is_empty(),
        })
}

/// Whether `request` may be handed to an issuance operation. Empty or unknown types never are.
pub fn validate(request: &CredentialRequest) -> bool {
    match request.kind() {
        Some(kind) => missing_field(kind, request).is_none(),
        None => false,
    }
}
