pub mod mqtt;
pub mod traits;

pub use mqtt::MqttLink;
pub use traits::Publisher;
