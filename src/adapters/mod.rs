pub mod kis_rest;
pub mod postgres;
pub mod telegram;

pub use kis_rest::{IssuedToken, KisClient};
pub use postgres::{PostgresStore, SharedToken};
pub use telegram::TelegramNotifier;
