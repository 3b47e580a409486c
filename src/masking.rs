//! Masking of Indian personal identifiers.
//!
//! Pure string transforms: each kind either recognises the value and
//! returns a partially redacted form, or rejects it.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

static PAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{5}[0-9]{4}[A-Z]$").unwrap());

static AADHAAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{12}$").unwrap());

// Indian mobile numbers start with 6-9
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[6-9][0-9]{9}$").unwrap());

static GSTIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z][1-9A-Z]Z[0-9A-Z]$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Pan,
    Aadhaar,
    Phone,
    Email,
    Gstin,
}

/// Order in which detection tries each kind.
const DETECTION_ORDER: [IdentifierKind; 5] = [
    IdentifierKind::Pan,
    IdentifierKind::Aadhaar,
    IdentifierKind::Phone,
    IdentifierKind::Email,
    IdentifierKind::Gstin,
];

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Pan => "pan",
            IdentifierKind::Aadhaar => "aadhaar",
            IdentifierKind::Phone => "phone",
            IdentifierKind::Email => "email",
            IdentifierKind::Gstin => "gstin",
        }
    }

    /// Masked form of `value`, or `None` if it is not a valid identifier of this kind.
    pub fn mask(&self, value: &str) -> Option<String> {
        match self {
            IdentifierKind::Pan => mask_pan(value),
            IdentifierKind::Aadhaar => mask_aadhaar(value),
            IdentifierKind::Phone => mask_phone(value),
            IdentifierKind::Email => mask_email(value),
            IdentifierKind::Gstin => mask_gstin(value),
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DETECTION_ORDER
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

fn mask_pan(pan: &str) -> Option<String> {
    PAN_RE
        .is_match(pan)
        .then(|| format!("{}XXX{}", &pan[..2], &pan[5..]))
}

fn mask_aadhaar(aadhaar: &str) -> Option<String> {
    let digits: String = aadhaar.chars().filter(|c| *c != '-' && *c != ' ').collect();
    AADHAAR_RE
        .is_match(&digits)
        .then(|| format!("XXXX-XXXX-{}", &digits[8..]))
}

fn mask_phone(phone: &str) -> Option<String> {
    let digits = phone.replace(' ', "");
    PHONE_RE
        .is_match(&digits)
        .then(|| format!("{}*****{}", &digits[..2], &digits[7..]))
}

fn mask_email(email: &str) -> Option<String> {
    let (local, domain) = email.split_once('@')?;
    if domain.contains('@') || local.len() < 2 {
        return None;
    }
    let first = local.chars().next()?;
    Some(format!("{}***@{}", first, domain))
}

fn mask_gstin(gstin: &str) -> Option<String> {
    GSTIN_RE
        .is_match(gstin)
        .then(|| format!("{}*****{}", &gstin[..5], &gstin[10..]))
}

/// Masks `value` as the kind named by `kind` (case-insensitive).
pub fn apply_mask(kind: &str, value: &str) -> Option<String> {
    kind.parse::<IdentifierKind>().ok()?.mask(value)
}

/// First kind, in detection order, that accepts `value`.
pub fn detect(value: &str) -> Option<IdentifierKind> {
    DETECTION_ORDER
        .into_iter()
        .find(|kind| kind.mask(value).is_some())
}
