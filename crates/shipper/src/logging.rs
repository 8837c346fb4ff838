use crate::config::ShipperConfig;

pub fn setup_logging(config: &ShipperConfig) {
    common::setup_logging(config.environment.clone());
}
