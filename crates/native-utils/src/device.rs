use anyhow::{Result, anyhow};
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

/// Resolve an input device by name, or fall back to the host default.
pub fn input_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    tracing::debug!("Host: {:?}", host.id());
    match name {
        Some(name) => host
            .input_devices()?
            .find(|device| device.name().is_ok_and(|n| n == name))
            .ok_or_else(|| anyhow!("input device not found: {name}")),
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device")),
    }
}

/// Resolve an output device by name, or fall back to the host default.
pub fn output_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    tracing::debug!("Host: {:?}", host.id());
    match name {
        Some(name) => host
            .output_devices()?
            .find(|device| device.name().is_ok_and(|n| n == name))
            .ok_or_else(|| anyhow!("output device not found: {name}")),
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device")),
    }
}

/// One line per available input device, with the default marked. Used for
/// startup logging.
pub fn describe_inputs() -> Result<String> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut lines = Vec::new();
    for device in host.input_devices()? {
        let name = device.name()?;
        let config = device.default_input_config()?;
        let mut line = format!(
            " * {} ({}ch, {}hz)",
            name,
            config.channels(),
            config.sample_rate().0
        );
        if Some(&name) == default_name.as_ref() {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}

/// One line per available output device, with the default marked.
pub fn describe_outputs() -> Result<String> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut lines = Vec::new();
    for device in host.output_devices()? {
        let name = device.name()?;
        let config = device.default_output_config()?;
        let mut line = format!(
            " * {} ({}ch, {}hz)",
            name,
            config.channels(),
            config.sample_rate().0
        );
        if Some(&name) == default_name.as_ref() {
            line.push_str(" [default]");
        }
        lines.push(line);
    }
    Ok(lines.join("\n"))
}
