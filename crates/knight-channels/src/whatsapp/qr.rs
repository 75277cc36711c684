//! Terminal rendering of pairing QR codes.

use knight_core::error::KnightError;
use qrcode::render::unicode;
use qrcode::{EcLevel, QrCode};

/// Render QR data with half-block characters (two module rows per text line).
pub fn generate_qr_terminal(qr_data: &str) -> Result<String, KnightError> {
    let code = QrCode::with_error_correction_level(qr_data.as_bytes(), EcLevel::L)
        .map_err(|e| KnightError::Channel(format!("QR generation failed: {e}")))?;

    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Print a pairing prompt with the QR code to stdout.
pub(super) fn print_pairing_qr(qr_data: &str) {
    match generate_qr_terminal(qr_data) {
        Ok(qr) => {
            println!("\nScan with WhatsApp > Linked Devices > Link a Device:\n");
            println!("{qr}");
        }
        Err(e) => {
            tracing::warn!("{e}; raw pairing code: {qr_data}");
        }
    }
}
