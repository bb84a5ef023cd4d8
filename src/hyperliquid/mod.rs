pub mod client;
pub mod ws_protocol;

pub use client::HyperliquidClient;
pub use ws_protocol::{SubscriptionFrame, WsEnvelope};
