mod health;
mod topics;

pub use health::health_routes;
pub use topics::topic_routes;
