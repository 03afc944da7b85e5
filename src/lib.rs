pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::call_controller::{
    CallController, CallServices, CallSnapshot, FinalizedCall, StartCallRequest,
};
pub use application::commands::AppState;
pub use domain::models::{CallOutcome, CallPolicy, FollowUpPrompt, MissedCallRecord};
pub use infrastructure::error::InfraError;
pub use infrastructure::telephony::{NativeCallEvent, PlatformCapabilities, TelephonyBridge};
