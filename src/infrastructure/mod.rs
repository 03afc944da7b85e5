pub mod activity_log;
pub mod auth_client;
pub mod config;
pub mod credential_store;
pub mod crm_graphql_client;
pub mod error;
pub mod lead_cache;
pub mod telephony;
