//! Infrastructure layer: credential and client stores, secret hashing,
//! token issuance, the client-credentials broker and configuration.

pub mod broker;
pub mod clients;
pub mod config;
pub mod credentials;
pub mod issuer;
pub mod password;
pub mod revocation;

pub use broker::{
    BrokerError, BrokerSettings, ClientCredentialsBroker, HttpTokenEndpoint, LocalTokenEndpoint,
    ServiceToken, TokenEndpoint,
};
pub use clients::{ClientRegistry, ClientSecret, GrantType, RegisteredClient, StaticClientRegistry};
pub use config::{ConfigError, TrustgateConfig};
pub use credentials::{CredentialRecord, CredentialStore, InMemoryCredentialStore, SeedError};
pub use issuer::{
    ClientCredentialsResponse, DEFAULT_ROLE, IssueError, IssuedToken, IssuerSettings,
    RefreshRejection, TokenIssuer, TokenPair, TokenResponse,
};
pub use password::{HashError, hash_secret, verify_absent, verify_secret};
pub use revocation::{InMemoryRevocationStore, RevocationStore};
