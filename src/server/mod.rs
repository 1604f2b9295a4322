mod connection;
mod handler;
mod listener;

pub use connection::Connection;
pub use handler::Handler;
pub use listener::Listener;
