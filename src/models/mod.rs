//! Data model shared by the transport components.

mod close_code;
mod connection_options;
mod connection_state;
mod failure_counters;
mod message;
mod notice;

pub use close_code::CloseCode;
pub use connection_options::ConnectionOptions;
pub use connection_state::ConnectionState;
pub use failure_counters::FailureCounters;
pub use message::{is_reserved_kind, Message, AUTHENTICATION_ERROR, AUTHENTICATION_SUCCESS};
pub use notice::ConnectivityNotice;
