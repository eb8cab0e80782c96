pub mod backend;
pub mod batch;
pub mod cancel;
pub mod fixture_backend;
pub mod http_backend;
pub mod runner;
pub mod scoring;
pub mod strategy;
