//! Real-time sine tone generator and loopback verifier.
//!
//! The render side turns a [`PhaseOscillator`] into whatever wire encoding a
//! host negotiates and hands it out one callback at a time. The capture side
//! collects what comes back and judges frequency and amplitude.

pub mod analyzer;
pub mod backend;
pub mod capture;
pub mod config;
pub mod control;
#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod encode;
pub mod error;
pub mod format;
pub mod harness;
#[doc(hidden)]
pub mod invariant_ppt;
#[doc(hidden)]
pub mod invariant_rt;
pub mod loopback;
pub mod osc;
pub mod render;
pub mod states;
pub mod wav;

pub use analyzer::{AnalysisResult, SignalAnalyzer};
pub use backend::{AudioBackend, BackendError, DeviceSelector, StreamRequest};
pub use config::{CaptureConfig, PlayDuration, ToneConfig};
pub use encode::{Encoding, SampleEncoder};
pub use error::{Error, Result};
pub use format::{negotiate, FormatDescriptor, StreamFormat, SubFormatTag};
pub use harness::{FailureReason, Verdict, VerificationHarness, VerificationReport};
pub use osc::PhaseOscillator;
pub use render::{RenderPort, RenderScheduler};
pub use states::RenderState;
