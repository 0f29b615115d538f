pub mod client;

pub use client::HttpCorrectionAgent;
