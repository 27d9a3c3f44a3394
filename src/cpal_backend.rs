//! Device backend on top of cpal (push model).
//!
//! cpal hands the callback raw sample memory in the platform's byte order.
//! The encoder writes little-endian, which is what every host cpal supports
//! runs on.

use crate::backend::{
    AudioBackend, BackendError, DeviceDirection, DeviceInfo, DeviceSelector, InputStream,
    OutputStream, StreamRequest,
};
use crate::capture::CapturePort;
use crate::format::FormatDescriptor;
use crate::render::{fill_safe, RenderPort, RenderStatus};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Backend context for the platform's default cpal host.
pub struct CpalBackend {
    host: cpal::Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        let host = cpal::default_host();
        debug!("Using cpal host {:?}", host.id());
        Self { host }
    }

    fn find_device(
        &self,
        selector: &DeviceSelector,
        direction: DeviceDirection,
    ) -> Result<cpal::Device, BackendError> {
        match selector {
            DeviceSelector::Default => {
                let device = match direction {
                    DeviceDirection::Output => self.host.default_output_device(),
                    DeviceDirection::Input => self.host.default_input_device(),
                };
                device.ok_or_else(|| {
                    BackendError::Unavailable(format!("no default {:?} device", direction))
                })
            }
            DeviceSelector::Named(wanted) => {
                let wanted_lower = wanted.to_lowercase();
                let mut devices = self.list(direction)?;
                devices
                    .find(|d| {
                        d.name()
                            .map(|n| n.to_lowercase().contains(&wanted_lower))
                            .unwrap_or(false)
                    })
                    .ok_or_else(|| BackendError::DeviceNotFound(wanted.clone()))
            }
        }
    }

    fn list(
        &self,
        direction: DeviceDirection,
    ) -> Result<Box<dyn Iterator<Item = cpal::Device>>, BackendError> {
        let devices: Box<dyn Iterator<Item = cpal::Device>> = match direction {
            DeviceDirection::Output => Box::new(
                self.host
                    .output_devices()
                    .map_err(|e| BackendError::Unavailable(e.to_string()))?,
            ),
            DeviceDirection::Input => Box::new(
                self.host
                    .input_devices()
                    .map_err(|e| BackendError::Unavailable(e.to_string()))?,
            ),
        };
        Ok(devices)
    }

    fn describe_device(
        &self,
        device: &cpal::Device,
        direction: DeviceDirection,
        default_name: Option<&str>,
    ) -> Option<DeviceInfo> {
        let name = device.name().ok()?;
        let config = match direction {
            DeviceDirection::Output => device.default_output_config().ok(),
            DeviceDirection::Input => device.default_input_config().ok(),
        };
        Some(DeviceInfo {
            is_default: default_name == Some(name.as_str()),
            name,
            direction,
            default_format: config.and_then(|c| {
                descriptor_for(c.sample_format(), c.sample_rate().0, c.channels())
            }),
        })
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a cpal sample format to the descriptor a host would report for it.
pub fn descriptor_for(
    sample_format: cpal::SampleFormat,
    sample_rate_hz: u32,
    channel_count: u16,
) -> Option<FormatDescriptor> {
    match sample_format {
        cpal::SampleFormat::F32 => {
            Some(FormatDescriptor::ieee_float(sample_rate_hz, channel_count))
        }
        cpal::SampleFormat::I16 => Some(FormatDescriptor::pcm(sample_rate_hz, channel_count, 16)),
        cpal::SampleFormat::I32 => Some(FormatDescriptor::pcm(sample_rate_hz, channel_count, 32)),
        _ => None,
    }
}

/// Pick a supported configuration, preferring the requested rate and width.
fn choose_config(
    supported: Vec<cpal::SupportedStreamConfigRange>,
    fallback: cpal::SupportedStreamConfig,
    request: &StreamRequest,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat, FormatDescriptor), BackendError> {
    let rate = cpal::SampleRate(request.sample_rate_hz);
    let preferred = supported
        .into_iter()
        .filter(|r| {
            descriptor_for(r.sample_format(), request.sample_rate_hz, r.channels()).is_some()
        })
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .min_by_key(|r| {
            let width_penalty = if r.channels() == request.channel_count { 0 } else { 1 };
            let format_rank = match r.sample_format() {
                cpal::SampleFormat::F32 => 0,
                cpal::SampleFormat::I32 => 1,
                _ => 2,
            };
            (width_penalty, format_rank)
        })
        .map(|r| r.with_sample_rate(rate));

    let chosen = preferred.unwrap_or(fallback);
    let sample_format = chosen.sample_format();
    let descriptor = descriptor_for(sample_format, chosen.sample_rate().0, chosen.channels())
        .ok_or_else(|| {
            BackendError::StreamConfig(format!("unsupported sample format {:?}", sample_format))
        })?;
    Ok((chosen.config(), sample_format, descriptor))
}

/// Counts host errors other than a lost device as xruns, on the stream and
/// on the render status when there is one.
fn stream_error_handler(
    what: &'static str,
    xruns: Arc<AtomicU32>,
    render: Option<Arc<RenderStatus>>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| match err {
        cpal::StreamError::DeviceNotAvailable => {
            error!("{} device is no longer available", what)
        }
        other => {
            xruns.fetch_add(1, Ordering::Relaxed);
            if let Some(status) = &render {
                status.record_xrun();
            }
            warn!("{}", BackendError::Xrun(format!("{} stream: {}", what, other)));
        }
    }
}

impl AudioBackend for CpalBackend {
    type Output = CpalOutput;
    type Input = CpalInput;

    fn name(&self) -> &'static str {
        "cpal"
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        let default_out = self.host.default_output_device().and_then(|d| d.name().ok());
        let default_in = self.host.default_input_device().and_then(|d| d.name().ok());
        let mut infos = Vec::new();
        for device in self.list(DeviceDirection::Output)? {
            let info =
                self.describe_device(&device, DeviceDirection::Output, default_out.as_deref());
            infos.extend(info);
        }
        for device in self.list(DeviceDirection::Input)? {
            let info =
                self.describe_device(&device, DeviceDirection::Input, default_in.as_deref());
            infos.extend(info);
        }
        Ok(infos)
    }

    fn open_output_stream(
        &self,
        request: &StreamRequest,
    ) -> Result<(CpalOutput, FormatDescriptor), BackendError> {
        let device = self.find_device(&request.device, DeviceDirection::Output)?;
        let supported = device
            .supported_output_configs()
            .map_err(|e| BackendError::StreamConfig(e.to_string()))?
            .collect();
        let fallback = device
            .default_output_config()
            .map_err(|e| BackendError::StreamConfig(e.to_string()))?;
        let (config, sample_format, descriptor) = choose_config(supported, fallback, request)?;
        info!(
            "Output device '{}': {:?} x{} @ {} Hz",
            device.name().unwrap_or_default(),
            sample_format,
            config.channels,
            config.sample_rate.0
        );
        Ok((
            CpalOutput {
                device,
                config,
                sample_format,
                stream: None,
                xruns: Arc::new(AtomicU32::new(0)),
            },
            descriptor,
        ))
    }

    fn open_input_stream(
        &self,
        request: &StreamRequest,
    ) -> Result<(CpalInput, FormatDescriptor), BackendError> {
        let device = self.find_device(&request.device, DeviceDirection::Input)?;
        let supported = device
            .supported_input_configs()
            .map_err(|e| BackendError::StreamConfig(e.to_string()))?
            .collect();
        let fallback = device
            .default_input_config()
            .map_err(|e| BackendError::StreamConfig(e.to_string()))?;
        let (config, sample_format, descriptor) = choose_config(supported, fallback, request)?;
        info!(
            "Input device '{}': {:?} x{} @ {} Hz",
            device.name().unwrap_or_default(),
            sample_format,
            config.channels,
            config.sample_rate.0
        );
        Ok((
            CpalInput {
                device,
                config,
                sample_format,
                stream: None,
                xruns: Arc::new(AtomicU32::new(0)),
            },
            descriptor,
        ))
    }
}

/// An opened cpal output. The host stream is built on `start`.
pub struct CpalOutput {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    stream: Option<cpal::Stream>,
    xruns: Arc<AtomicU32>,
}

impl CpalOutput {
    pub fn xruns(&self) -> u32 {
        self.xruns.load(Ordering::Relaxed)
    }
}

impl OutputStream for CpalOutput {
    fn start(&mut self, mut port: Box<dyn RenderPort>) -> Result<(), BackendError> {
        let channels = usize::from(self.config.channels.max(1));
        let render = port.render_status();
        port.start();
        let stream = self
            .device
            .build_output_stream_raw(
                &self.config,
                self.sample_format,
                move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    fill_safe(port.as_mut(), frames, data.bytes_mut());
                },
                stream_error_handler("output", Arc::clone(&self.xruns), render),
                None,
            )
            .map_err(|e| BackendError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| BackendError::Stream(e.to_string()))?;
        debug!("Output stream started");
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| BackendError::Stream(e.to_string()))?;
            debug!("Output stream stopped ({} xruns)", self.xruns());
        }
        Ok(())
    }
}

/// An opened cpal input. The host stream is built on `start`.
pub struct CpalInput {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    stream: Option<cpal::Stream>,
    xruns: Arc<AtomicU32>,
}

impl InputStream for CpalInput {
    fn start(&mut self, mut port: Box<dyn CapturePort>) -> Result<(), BackendError> {
        let channels = usize::from(self.config.channels.max(1));
        port.start();
        let stream = self
            .device
            .build_input_stream_raw(
                &self.config,
                self.sample_format,
                move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                    port.deliver(data.len() / channels, data.bytes());
                },
                stream_error_handler("input", Arc::clone(&self.xruns), None),
                None,
            )
            .map_err(|e| BackendError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| BackendError::Stream(e.to_string()))?;
        debug!("Input stream started");
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        if let Some(stream) = self.stream.take() {
            stream
                .pause()
                .map_err(|e| BackendError::Stream(e.to_string()))?;
            debug!(
                "Input stream stopped ({} xruns)",
                self.xruns.load(Ordering::Relaxed)
            );
        }
        Ok(())
    }
}
