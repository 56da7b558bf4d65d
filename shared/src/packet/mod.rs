pub mod error;
pub mod header;
pub mod outgoing;
pub mod packet_type;
