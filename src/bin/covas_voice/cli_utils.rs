use anyhow::Result;
use covas_voice::audio;

/// Which side of the audio stack a listing covers.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DeviceKind {
    Input,
    Output,
}

impl DeviceKind {
    fn label(self) -> &'static str {
        match self {
            DeviceKind::Input => "input",
            DeviceKind::Output => "output",
        }
    }

    fn test_env(self) -> &'static str {
        match self {
            DeviceKind::Input => "COVAS_VOICE_TEST_INPUT_DEVICES",
            DeviceKind::Output => "COVAS_VOICE_TEST_OUTPUT_DEVICES",
        }
    }
}

pub(crate) fn list_devices(kind: DeviceKind) -> Result<()> {
    // Comma-separated override so smoke tests never touch real hardware.
    let devices = if let Ok(raw) = std::env::var(kind.test_env()) {
        parse_device_list(&raw)
    } else {
        let listed = match kind {
            DeviceKind::Input => audio::list_input_devices(),
            DeviceKind::Output => audio::list_output_devices(),
        };
        listed.unwrap_or_else(|err| {
            eprintln!("Failed to list audio {} devices: {err}", kind.label());
            Vec::new()
        })
    };

    print!("{}", render_device_list(kind, &devices));
    Ok(())
}

fn parse_device_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn render_device_list(kind: DeviceKind, devices: &[String]) -> String {
    if devices.is_empty() {
        return format!("No audio {} devices detected.\n", kind.label());
    }
    let mut out = format!("Available audio {} devices:\n", kind.label());
    for name in devices {
        out.push_str(&format!("  - {name}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_device_list_skips_blank_entries() {
        assert_eq!(
            parse_device_list(" USB Mic , ,Headset,"),
            vec!["USB Mic".to_string(), "Headset".to_string()]
        );
        assert!(parse_device_list("   ").is_empty());
    }

    #[test]
    fn render_device_list_formats_entries() {
        let rendered = render_device_list(DeviceKind::Output, &["Speakers".to_string()]);
        assert_eq!(rendered, "Available audio output devices:\n  - Speakers\n");
        assert_eq!(
            render_device_list(DeviceKind::Input, &[]),
            "No audio input devices detected.\n"
        );
    }
}
