//! Nearby network discovery through NetworkManager

use serde::Serialize;

/// A network seen by the last scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Network {
    pub name: String,
    pub secured: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to run nmcli: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("nmcli exited with {status}: {stderr}")]
    Failed {
        status: std::process::ExitStatus,
        stderr: String,
    },
}

/// List nearby networks with `nmcli -t -f SSID,SECURITY dev wifi`
pub async fn scan() -> Result<Vec<Network>, ScanError> {
    let output = tokio::process::Command::new("nmcli")
        .args(["-t", "-f", "SSID,SECURITY", "dev", "wifi"])
        .output()
        .await?;
    if !output.status.success() {
        return Err(ScanError::Failed {
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    let networks = parse_nmcli(&String::from_utf8_lossy(&output.stdout));
    log::debug!("scan found {} networks", networks.len());
    Ok(networks)
}

/// Parse terse nmcli output, one `SSID:SECURITY` per line
///
/// Hidden networks (blank SSID) are skipped and each name is listed once, in
/// the order first seen. Names are kept byte for byte, whitespace included.
pub fn parse_nmcli(output: &str) -> Vec<Network> {
    let mut networks: Vec<Network> = Vec::new();
    for line in output.lines() {
        let fields = split_terse(line);
        let name = fields.first().map(String::as_str).unwrap_or_default();
        if name.trim().is_empty() || networks.iter().any(|n| n.name == name) {
            continue;
        }
        let security = fields.get(1).map(|f| f.trim()).unwrap_or_default();
        networks.push(Network {
            name: name.to_string(),
            secured: !security.is_empty() && security != "--",
        });
    }
    networks
}

/// Split on unescaped `:`; nmcli escapes `:` and `\` in values with a backslash
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = vec![String::new()];
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    if let Some(field) = fields.last_mut() {
                        field.push(next);
                    }
                }
            }
            ':' => fields.push(String::new()),
            _ => {
                if let Some(field) = fields.last_mut() {
                    field.push(c);
                }
            }
        }
    }
    fields
}
