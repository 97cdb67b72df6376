//! Streaming manifest gateway
//!
//! Requests carry a filter grammar in their path, e.g.
//! `/v(hdr10)/a(l(es))/t(1700000000,1700000600)/live/master.m3u8`. The
//! [`filters::FilterParser`] turns that into a [`filters::FilterSet`], the
//! origin manifest is fetched, and the [`hls::HlsFilter`] or
//! [`dash::DashFilter`] engine rewrites it.

pub mod config;
pub mod dash;
pub mod errors;
pub mod filters;
pub mod hls;
pub mod origin;
pub mod plugins;
pub mod services;
pub mod utils;
pub mod web;
