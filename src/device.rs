//! Output device discovery and line-config negotiation.
//!
//! Thin wrappers around CPAL for listing output devices, selecting one by
//! substring match, and choosing a stream config that can render the
//! canonical playback format. There is no resampler in this pipeline, so a
//! config only qualifies when it supports the source's exact sample rate
//! and channel count; everything else is a device-open failure.

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::PlayerError;
use crate::format::FormatDescriptor;

/// Pick the first output device matching `needle` (case-insensitive), or
/// the host default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, PlayerError> {
    let mut devices: Vec<cpal::Device> = host
        .output_devices()
        .map_err(|e| PlayerError::DeviceOpen(format!("no output devices: {e}")))?
        .collect();

    if let Some(needle) = needle {
        if let Some(d) = devices.drain(..).find(|d| {
            d.description()
                .ok()
                .map(|n| matches_device_name(&n.name(), needle))
                .unwrap_or(false)
        }) {
            return Ok(d);
        }
        return Err(PlayerError::DeviceOpen(format!(
            "no output device matched: {needle}"
        )));
    }

    host.default_output_device()
        .ok_or_else(|| PlayerError::DeviceOpen("no default output device".into()))
}

/// Choose a supported stream config able to render `format`.
///
/// Candidates must carry the exact channel count and admit the exact sample
/// rate; among those the sample format cheapest to feed from `i16` wins.
pub fn pick_line_config(
    device: &cpal::Device,
    format: &FormatDescriptor,
) -> Result<cpal::SupportedStreamConfig, PlayerError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| PlayerError::DeviceOpen(format!("supported configs unavailable: {e}")))?;

    let mut best: Option<(u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        if !range_admits(
            range.min_sample_rate(),
            range.max_sample_rate(),
            range.channels(),
            format.sample_rate,
            format.channels,
        ) {
            continue;
        }
        let rank = sample_format_rank(range.sample_format());
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => rank < *best_rank,
        };
        if replace {
            best = Some((rank, range.with_sample_rate(format.sample_rate)));
        }
    }

    best.map(|(_, cfg)| cfg).ok_or_else(|| {
        PlayerError::DeviceOpen(format!("device does not support {format}"))
    })
}

/// Print available output devices, marking the host default.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    let default_name = host
        .default_output_device()
        .and_then(|d| d.description().ok())
        .map(|d| d.to_string());

    let devices = host.output_devices().context("No output devices")?;
    for (i, d) in devices.enumerate() {
        let desc = d.description()?.to_string();
        if default_name.as_deref() == Some(desc.as_str()) {
            println!("#{i}: {desc} (default)");
        } else {
            println!("#{i}: {desc}");
        }
    }
    Ok(())
}

fn range_admits(min_rate: u32, max_rate: u32, channels: u16, rate: u32, want_channels: u16) -> bool {
    channels == want_channels && (min_rate..=max_rate).contains(&rate)
}

/// Rank device sample formats by conversion cost from `i16` (lower wins).
fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::I16 => 0,
        cpal::SampleFormat::F32 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}
