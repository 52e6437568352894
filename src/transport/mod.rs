// MIT License - Copyright (c) 2026 Peter Wright
// Concrete panel links and entity publishers

pub mod mqtt;

pub use mqtt::{MqttConnector, MqttEntitySink};
