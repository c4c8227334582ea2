//! Guest photo uploads for events: a resumable batch uploader and the
//! session service that authorizes and reconciles its uploads.

pub mod api;
pub mod config;
pub mod metrics;
pub mod progress;
pub mod protocol;
pub mod ratelimit;
pub mod session;
pub mod storage;
pub mod transfer;
pub mod uploader;
