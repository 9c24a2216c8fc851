pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod dag;
pub mod errors;
pub mod feature;
pub mod host;
pub mod iteration;
pub mod logging;
pub mod session;
pub mod store;
pub mod tracker;
pub mod ui;
pub mod validation;
