//! Host backend contract.
//!
//! A backend is an explicit context object. Every stream is opened through
//! it and reports the [`FormatDescriptor`] the host actually chose. Push
//! backends call the port from their own callback thread; pull backends are
//! driven by [`drive_pull`](crate::render::drive_pull) and
//! [`drive_capture_pull`](crate::capture::drive_capture_pull).

use crate::capture::CapturePort;
use crate::format::FormatDescriptor;
use crate::render::RenderPort;
use std::fmt;
use thiserror::Error;

/// Which device a stream should open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    #[default]
    Default,
    Named(String),
}

impl DeviceSelector {
    /// `None` or an empty name selects the default device.
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(n) if !n.is_empty() => DeviceSelector::Named(n.to_string()),
            _ => DeviceSelector::Default,
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Default => write!(f, "<default>"),
            DeviceSelector::Named(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    Output,
    Input,
}

/// One entry of a device listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub direction: DeviceDirection,
    pub is_default: bool,
    /// The host's preferred layout, if it reports one.
    pub default_format: Option<FormatDescriptor>,
}

/// What the caller would like a stream to look like. The host may differ.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub device: DeviceSelector,
    pub sample_rate_hz: u32,
    pub channel_count: u16,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// No audio service, or the backend was built without support.
    #[error("audio backend unavailable: {0}")]
    Unavailable(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("stream configuration rejected: {0}")]
    StreamConfig(String),
    #[error("stream error: {0}")]
    Stream(String),
    /// Under- or overrun reported by the host. Logged; the stream continues.
    #[error("xrun: {0}")]
    Xrun(String),
}

/// An opened output stream.
pub trait OutputStream {
    /// Start pulling frames from `port`.
    fn start(&mut self, port: Box<dyn RenderPort>) -> Result<(), BackendError>;
    /// Stop the host stream. Idempotent.
    fn stop(&mut self) -> Result<(), BackendError>;
}

/// An opened input stream.
pub trait InputStream {
    /// Start delivering captured frames to `port`.
    fn start(&mut self, port: Box<dyn CapturePort>) -> Result<(), BackendError>;
    /// Stop the host stream. Idempotent.
    fn stop(&mut self) -> Result<(), BackendError>;
}

/// A host audio API.
pub trait AudioBackend {
    type Output: OutputStream;
    type Input: InputStream;

    fn name(&self) -> &'static str;

    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError>;

    fn open_output_stream(
        &self,
        request: &StreamRequest,
    ) -> Result<(Self::Output, FormatDescriptor), BackendError>;

    fn open_input_stream(
        &self,
        request: &StreamRequest,
    ) -> Result<(Self::Input, FormatDescriptor), BackendError>;
}
