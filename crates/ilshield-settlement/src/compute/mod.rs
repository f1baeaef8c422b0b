//! Confidential compute client, worker transports and price checks

pub mod client;
pub mod http;
pub mod local;
pub mod price_feed;

pub use client::{ComputeClient, ComputeWorker};
pub use http::HttpComputeWorker;
pub use local::LocalComputeWorker;
pub use price_feed::{PricePoint, PriceFeedValidator, SeriesValidation};
