pub mod envelope;
pub mod errors;
pub mod ids;
pub mod mail;
pub mod security;

pub use envelope::EventEnvelope;
pub use errors::MailError;
pub use ids::ConnectionId;
