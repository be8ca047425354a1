//! Audio acquisition, buffering and playback control.
//!
//! Source resolution across mirrors, the offline acquisition pipeline with its
//! symphonia/rubato/LAME transcoder, the look-ahead buffer, and the queue
//! manager driving the playback surface.

pub mod acquisition;
pub mod backend;
pub mod decoder;
pub mod loader;
pub mod prebuffer;
pub mod queue_manager;
pub mod queue_manager_tests;
pub mod resampler;
pub mod resolver;
pub mod retry;
pub mod surface;
pub mod transcoder;
