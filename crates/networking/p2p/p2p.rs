pub mod fanout;
pub mod handler;
pub mod messages;
pub mod peers;

pub use fanout::WireGossip;
pub use handler::{Inbound, handle_message};
pub use messages::{InfoResponse, Message, MessageError};
pub use peers::PeerBook;
