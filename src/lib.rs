//! Continuous seismic acquisition daemon: RS-485 ingest, STA/LTA trigger detection,
//! scheduled MiniSEED archival, and a live decimated broadcast feed.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod decimate;
pub mod detector;
pub mod detector_worker;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod gpio;
pub mod ingest;
pub mod lifecycle;
pub mod mseed;
pub mod queue;
pub mod sample;
pub mod serial;
pub mod shared;
pub mod writer;
