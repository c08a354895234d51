pub mod connection;
pub mod messages;
pub mod outbox;
pub mod requests;
pub mod subscriptions;

pub use connection::ConnectionManager;
pub use messages::{parse_message, InboundMessage};
pub use outbox::Outbox;
pub use requests::OutboundRequest;
