//! Serial port listing.

use anyhow::Result;
use console::style;
use simmflash::{DetectedPort, auto_detect_port, discover_ports};

fn port_json(port: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "board": port.board.name(),
        "programmer": port.is_programmer(),
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
        "serial": port.serial,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = discover_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let board = if port.is_programmer() {
            format!(" [{}]", style(port.board.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();
        eprintln!(
            "  {} {}{board}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan()
        );
    }

    if let Ok(port) = auto_detect_port() {
        eprintln!(
            "\n{} Programmer: {}",
            style("→").green().bold(),
            style(&port.name).cyan().bold()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use simmflash::BoardKind;

    #[test]
    fn test_port_json_fields() {
        let port = DetectedPort {
            name: "/dev/ttyACM0".to_string(),
            board: BoardKind::from_vid_pid(0x16D0, 0x06AA),
            vid: Some(0x16D0),
            pid: Some(0x06AA),
            manufacturer: None,
            product: Some("SIMM Programmer".to_string()),
            serial: None,
        };
        let value = port_json(&port);
        assert_eq!(value["name"], "/dev/ttyACM0");
        assert_eq!(value["programmer"], true);
        assert_eq!(value["vid"], 0x16D0);
        assert!(value["serial"].is_null());
    }
}
