pub mod call_session;
pub mod lead_directory;
pub mod models;
pub mod phone_number;
