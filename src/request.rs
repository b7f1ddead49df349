//! Wire model for credential requests and their correlated responses.

use base64::engine::general_purpose::STANDARD as Base64Engine;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PayloadError;

/// The closed set of request kinds the provisioner acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Vpn,
    Web,
    Probe,
    VpnService,
    RevokeVpn,
    RevokeWeb,
    RevokeProbe,
    RevokeVpnService,
    RevokeAll,
    CreateCrls,
}

/// A request field that can be required or passed to an issuance operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    User,
    Identity,
    Endpoint,
    Host,
    Allocator,
    ProbeCred,
}

impl RequestKind {
    pub const ALL: [RequestKind; 10] = [
        RequestKind::Vpn,
        RequestKind::Web,
        RequestKind::Probe,
        RequestKind::VpnService,
        RequestKind::RevokeVpn,
        RequestKind::RevokeWeb,
        RequestKind::RevokeProbe,
        RequestKind::RevokeVpnService,
        RequestKind::RevokeAll,
        RequestKind::CreateCrls,
    ];

    /// Returns `None` for the empty string and for any unrecognized type.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Vpn => "vpn",
            RequestKind::Web => "web",
            RequestKind::Probe => "probe",
            RequestKind::VpnService => "vpn-service",
            RequestKind::RevokeVpn => "revoke-vpn",
            RequestKind::RevokeWeb => "revoke-web",
            RequestKind::RevokeProbe => "revoke-probe",
            RequestKind::RevokeVpnService => "revoke-vpn-service",
            RequestKind::RevokeAll => "revoke-all",
            RequestKind::CreateCrls => "create-crls",
        }
    }

    /// Fields that must be present (and, for `User`, a valid email) before dispatch.
    pub fn required_fields(&self) -> &'static [Field] {
        use Field::*;
        match self {
            RequestKind::Vpn | RequestKind::Web => &[User, Identity],
            RequestKind::Probe => &[User, Identity, Endpoint],
            RequestKind::VpnService => &[User, Identity, Host, Allocator, ProbeCred],
            RequestKind::RevokeVpn
            | RequestKind::RevokeWeb
            | RequestKind::RevokeProbe
            | RequestKind::RevokeVpnService
            | RequestKind::RevokeAll => &[User],
            RequestKind::CreateCrls => &[],
        }
    }

    /// Name of the external executable handling this kind.
    pub fn operation(&self) -> &'static str {
        match self {
            RequestKind::Vpn => "create-vpn-key",
            RequestKind::Web => "create-web-key",
            RequestKind::Probe => "create-probe-key",
            RequestKind::VpnService => "create-vpn-service-key",
            RequestKind::RevokeVpn => "revoke-vpn-key",
            RequestKind::RevokeWeb => "revoke-web-key",
            RequestKind::RevokeProbe => "revoke-probe-key",
            RequestKind::RevokeVpnService => "revoke-vpn-service-key",
            RequestKind::RevokeAll => "revoke-all-key",
            RequestKind::CreateCrls => "create-all-crls",
        }
    }

    /// Positional argument order for the operation.
    pub fn argument_fields(&self) -> &'static [Field] {
        use Field::*;
        match self {
            RequestKind::Vpn | RequestKind::Web => &[User, Identity],
            RequestKind::Probe => &[User, Identity, Endpoint],
            RequestKind::VpnService => &[User, Identity, Host, Allocator, ProbeCred],
            // VPN revocation can target a single device identity.
            RequestKind::RevokeVpn => &[User, Identity],
            RequestKind::RevokeWeb
            | RequestKind::RevokeProbe
            | RequestKind::RevokeVpnService
            | RequestKind::RevokeAll => &[User],
            RequestKind::CreateCrls => &[],
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as carried on the queue. Every field but `type` is optional on the wire;
/// presence rules live in [`crate::validation`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequest {
    #[serde(rename = "type", default, deserialize_with = "null_as_empty")]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocator: Option<String>,
    #[serde(rename = "probecred", default, skip_serializing_if = "Option::is_none")]
    pub probe_cred: Option<String>,
}

/// Senders may write `null` for a field they have no value for; that reads as empty.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl CredentialRequest {
    pub fn kind(&self) -> Option<RequestKind> {
        RequestKind::parse(&self.kind)
    }

    /// Value of a field, with absent optional fields reading as empty.
    pub fn field(&self, field: Field) -> &str {
        match field {
            Field::User => &self.user,
            Field::Identity => &self.identity,
            Field::Endpoint => self.endpoint.as_deref().unwrap_or(""),
            Field::Host => self.host.as_deref().unwrap_or(""),
            Field::Allocator => self.allocator.as_deref().unwrap_or(""),
            Field::ProbeCred => self.probe_cred.as_deref().unwrap_or(""),
        }
    }

    /// Ordered arguments for `kind`'s issuance operation.
    pub fn arguments_for(&self, kind: RequestKind) -> Vec<String> {
        kind.argument_fields()
            .iter()
            .map(|field| self.field(*field).to_string())
            .collect()
    }
}

/// Outcome of one consumed message, echoed back with the originating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    #[serde(flatten)]
    pub request: CredentialRequest,
    #[serde(rename = "id")]
    pub message_id: String,
    pub success: bool,
}

impl ProvisionResponse {
    pub fn new(request: CredentialRequest, message_id: impl Into<String>, success: bool) -> Self {
        Self {
            request,
            message_id: message_id.into(),
            success,
        }
    }
}

/// Base64 text -> request.
pub fn decode_request(data: &str) -> Result<CredentialRequest, PayloadError> {
    let bytes = Base64Engine.decode(data.trim())?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Response -> Base64 text of its JSON form.
pub fn encode_response(response: &ProvisionResponse) -> Result<String, PayloadError> {
    let json = serde_json::to_vec(response)?;
    Ok(Base64Engine.encode(json))
}
