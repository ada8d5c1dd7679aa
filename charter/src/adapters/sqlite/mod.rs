mod messages;
pub mod pool;
pub mod schema;

pub use messages::MessageStore;
