use crate::config::ReceiverConfig;

pub fn setup_logging(config: &ReceiverConfig) {
    common::setup_logging(config.environment.clone());
}
