//! Case reference parsing.
//!
//! The pipeline only depends on the [`ReferenceParser`] contract. The bundled
//! [`OfficeReferenceParser`] understands the compact office format
//! `<type letters><number digits><region>[<country>][<suffix digits>]`,
//! for example `P201900123EPDE01`.

use serde::{Deserialize, Serialize};

pub const INTERNATIONAL_REGION: &str = "WO";

/// Regional offices whose grants are validated nationally.
pub const REGIONAL_OFFICES: &[&str] = &["EP", "EA", "AP", "OA"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReference {
    pub is_valid: bool,
    pub kind: String,
    pub number: String,
    pub region: String,
    pub country: String,
    /// Canonical per-case key used to join cost records to cases.
    pub office_ref: String,
}

impl ParsedReference {
    pub fn invalid() -> Self {
        Self {
            is_valid: false,
            kind: String::new(),
            number: String::new(),
            region: String::new(),
            country: String::new(),
            office_ref: String::new(),
        }
    }

    /// Grouping key of the patent family (type + number).
    pub fn family_key(&self) -> String {
        format!("{}{}", self.kind, self.number)
    }

    pub fn is_international(&self) -> bool {
        self.region == INTERNATIONAL_REGION
    }

    /// National validation of a regional grant, e.g. `EP` validated in `DE`.
    pub fn is_validation(&self) -> bool {
        REGIONAL_OFFICES.contains(&self.region.as_str()) && !self.country.is_empty()
    }
}

pub trait ReferenceParser {
    fn parse(&self, reference: &str) -> ParsedReference;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OfficeReferenceParser;

impl ReferenceParser for OfficeReferenceParser {
    fn parse(&self, reference: &str) -> ParsedReference {
        let compact: String = reference
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '/')
            .collect::<String>()
            .to_ascii_uppercase();
        if !compact.is_ascii() {
            return ParsedReference::invalid();
        }

        let bytes = compact.as_bytes();
        let mut pos = 0;
        let take = |pos: &mut usize, pred: fn(&u8) -> bool, max: usize| -> String {
            let start = *pos;
            while *pos < bytes.len() && *pos - start < max && pred(&bytes[*pos]) {
                *pos += 1;
            }
            compact[start..*pos].to_string()
        };

        let kind = take(&mut pos, u8::is_ascii_alphabetic, 3);
        let number = take(&mut pos, u8::is_ascii_digit, usize::MAX);
        let region = take(&mut pos, u8::is_ascii_alphabetic, 2);
        let country = take(&mut pos, u8::is_ascii_alphabetic, 2);
        let suffix = take(&mut pos, u8::is_ascii_digit, usize::MAX);

        let well_formed = !kind.is_empty()
            && number.len() >= 3
            && region.len() == 2
            && (country.is_empty() || country.len() == 2)
            && pos == bytes.len();
        if !well_formed {
            return ParsedReference::invalid();
        }

        ParsedReference {
            is_valid: true,
            office_ref: format!("{kind}{number}{region}{country}{suffix}"),
            kind,
            number,
            region,
            country,
        }
    }
}
