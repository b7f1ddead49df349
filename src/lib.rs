pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod issuer;
pub mod publisher;
pub mod queue;
pub mod request;
pub mod store;
pub mod telemetry;
pub mod updater;
pub mod validation;

pub use config::{ProvisionerConfig, StoreConfig};
pub use dispatcher::{Dispatcher, DispatcherSettings, Disposition};
pub use error::{ProvisionerError, ProvisionerResult};
pub use issuer::{CommandIssuer, IssueOutcome, Issuer};
pub use request::{CredentialRequest, ProvisionResponse, RequestKind};
pub use updater::{IndexUpdater, UpdateOutcome};
