//! Registration-id (GSTIN) validation and invoice-number normalization.
//!
//! A registration id is 15 characters:
//!
//! ```text
//! 27 AAPFU0939F 1 Z V
//! │  │          │ │ └ mod-36 check character
//! │  │          │ └── literal 'Z'
//! │  │          └──── entity number (1-9, A-Z)
//! │  └─────────────── PAN: 5 letters, 4 digits, 1 letter
//! └────────────────── state code
//! ```

const CHARSET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

const STATE_CODES: &[&str] = &[
    "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12", "13", "14", "15",
    "16", "17", "18", "19", "20", "21", "22", "23", "24", "26", "27", "29", "30", "31", "32",
    "33", "34", "35", "36", "37",
];

/// Prefixes stripped before invoice numbers are compared.
const INVOICE_PREFIXES: &[&str] = &["INV-", "INV/", "BILL-", "BILL/", "TAX-", "TAX/"];

/// Trim and uppercase a registration id. No validation.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}

/// Structural validation plus state-code and check-character verification.
pub fn is_valid(id: &str) -> bool {
    let b = id.as_bytes();
    if b.len() != 15 || !id.is_ascii() {
        return false;
    }
    if !STATE_CODES.contains(&&id[..2]) {
        return false;
    }
    let pan_ok = b[2..7].iter().all(u8::is_ascii_uppercase)
        && b[7..11].iter().all(u8::is_ascii_digit)
        && b[11].is_ascii_uppercase();
    let entity_ok = matches!(b[12], b'1'..=b'9' | b'A'..=b'Z');
    if !pan_ok || !entity_ok || b[13] != b'Z' {
        return false;
    }
    check_char(&id[..14]) == Some(b[14] as char)
}

/// Compute the check character for a 14-character prefix.
pub fn check_char(prefix: &str) -> Option<char> {
    if prefix.len() != 14 {
        return None;
    }
    let mut total = 0u32;
    for (i, c) in prefix.bytes().enumerate() {
        let idx = CHARSET.iter().position(|&x| x == c)? as u32;
        let factor = if i % 2 == 0 { 1 } else { 2 };
        let product = idx * factor;
        total += product / 36 + product % 36;
    }
    let check = (36 - total % 36) % 36;
    Some(CHARSET[check as usize] as char)
}

/// Canonical form of an invoice number for comparison: uppercase, common
/// prefixes removed, only `[A-Z0-9-]` kept, leading zeros dropped.
pub fn normalize_invoice_number(raw: &str) -> String {
    let mut s = raw.trim().to_ascii_uppercase();
    if let Some(prefix) = INVOICE_PREFIXES.iter().find(|p| s.starts_with(*p)) {
        s = s[prefix.len()..].to_string();
    }
    let kept: String = s
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    let trimmed = kept.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".into()
    } else {
        trimmed.to_string()
    }
}
