//! Pairing URL and QR code generation.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::{ImageFormat, Luma};
use qrcode::{EcLevel, QrCode};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::net::Ipv4Addr;

use crate::common::StartError;

const QR_MIN_DIMENSION: u32 = 256;
const DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Everything a front-end needs to show the pairing screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingInfo {
    pub ip: Ipv4Addr,
    pub port: u16,
    pub url: String,
    #[serde(rename = "qrCode")]
    pub qr_code: String,
}

/// Canonical URL a phone browser opens.
pub fn pairing_url(ip: Ipv4Addr, port: u16) -> String {
    format!("http://{ip}:{port}/")
}

pub fn build_pairing_info(ip: Ipv4Addr, port: u16) -> Result<PairingInfo, StartError> {
    let url = pairing_url(ip, port);
    let qr_code = qr_data_uri(&url).map_err(|e| StartError::Pairing(format!("{e:#}")))?;

    Ok(PairingInfo {
        ip,
        port,
        url,
        qr_code,
    })
}

/// Encodes `payload` at error-correction level M and returns a PNG data URI.
pub fn qr_data_uri(payload: &str) -> Result<String> {
    let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
        .context("Failed to generate QR code")?;

    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .quiet_zone(true)
        .build();

    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .context("Failed to encode QR code as PNG")?;

    Ok(format!("{DATA_URI_PREFIX}{}", STANDARD.encode(png)))
}

/// Raw PNG bytes behind a data URI produced by [`qr_data_uri`].
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let encoded = uri
        .strip_prefix(DATA_URI_PREFIX)
        .context("Not a PNG data URI")?;
    STANDARD.decode(encoded).context("Invalid base64 payload")
}
