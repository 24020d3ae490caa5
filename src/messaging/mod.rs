//! Inbound message handling: bus payloads become requests and nodes.

pub mod producer;

pub use producer::{IngestReceipt, MessageKind, MessageProducer, RepositoryMessage};
