// Services module - pass builders and their inputs

pub mod apple_pass;
pub mod barcode_policy;
pub mod card_source;
pub mod credentials;
pub mod google_pass;
pub mod pass_assets;
pub mod pass_pipeline;
pub mod pwa_card;
pub mod qr_generator;
pub mod signature;
