pub mod auth;
pub mod bootstrap;
pub mod call_controller;
pub mod call_finalizer;
pub mod commands;
pub mod directory_sync;
pub mod missed_call_reporter;

#[cfg(test)]
pub(crate) mod test_support;
