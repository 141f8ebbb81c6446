//! Salesforce and Microsoft Graph access behind a refreshing OAuth client.

pub mod classify;
pub mod client;
pub mod graph;
pub mod oauth;
pub mod resolver;
pub mod salesforce;
pub mod services;
pub mod transport;

pub use client::{AuthorizedClient, BaseUrl};
pub use graph::GraphClient;
pub use oauth::{HttpTokenExchanger, OAuthClientConfig, OAuthClients, OAuthError, TokenExchanger};
pub use resolver::{EntityResolver, RecordSearch};
pub use salesforce::SalesforceClient;
pub use services::CrmServices;
pub use transport::{ApiRequest, ApiResponse, ApiTransport, ReqwestTransport, TransportError};
