//! Carrier and tracking details ride inside a movement's free-text notes as
//! `"<carrier> - <tracking>"`, optionally followed by a newline and the
//! operator's own remarks.

use serde::Serialize;

const HEADER_SEPARATOR: &str = " - ";

pub const CARRIERS: &[Carrier] = &[
    Carrier::FedEx,
    Carrier::Ups,
    Carrier::Usps,
    Carrier::Dhl,
    Carrier::Xpo,
    Carrier::Yrc,
    Carrier::OldDominion,
    Carrier::RoadRunner,
    Carrier::Custom,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carrier {
    FedEx,
    Ups,
    Usps,
    Dhl,
    Xpo,
    Yrc,
    OldDominion,
    RoadRunner,
    Custom,
}

impl Carrier {
    pub fn label(&self) -> &'static str {
        match self {
            Carrier::FedEx => "FedEx",
            Carrier::Ups => "UPS",
            Carrier::Usps => "USPS",
            Carrier::Dhl => "DHL",
            Carrier::Xpo => "XPO",
            Carrier::Yrc => "YRC",
            Carrier::OldDominion => "Old Dominion",
            Carrier::RoadRunner => "Road Runner",
            Carrier::Custom => "Custom",
        }
    }

    pub fn labels() -> Vec<&'static str> {
        CARRIERS.iter().map(Carrier::label).collect()
    }
}

/// Decoded view of a movement's notes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShippingNotes {
    pub carrier: Option<String>,
    pub tracking: Option<String>,
    pub remarks: Option<String>,
}

impl ShippingNotes {
    pub fn new(carrier: &str, tracking: &str, remarks: Option<&str>) -> Self {
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        Self {
            carrier: non_empty(carrier),
            tracking: non_empty(tracking),
            remarks: remarks.and_then(non_empty),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.carrier.is_none() && self.tracking.is_none() && self.remarks.is_none()
    }

    /// Pack into the single notes column.
    pub fn encode(&self) -> String {
        let mut out = format!(
            "{}{}{}",
            self.carrier.as_deref().unwrap_or_default(),
            HEADER_SEPARATOR,
            self.tracking.as_deref().unwrap_or_default()
        );
        if let Some(remarks) = &self.remarks {
            out.push('\n');
            out.push_str(remarks);
        }
        out
    }

    /// Unpack notes written by [`ShippingNotes::encode`].
    ///
    /// A header without the separator is taken as the carrier alone; only the
    /// first two separator-delimited segments of the header are kept.
    pub fn parse(notes: &str) -> Self {
        let (header, remarks) = match notes.split_once('\n') {
            Some((header, rest)) => (header, Some(rest)),
            None => (notes, None),
        };

        let mut segments = header.split(HEADER_SEPARATOR);
        let carrier = segments.next().filter(|s| !s.is_empty()).map(str::to_string);
        let tracking = segments.next().filter(|s| !s.is_empty()).map(str::to_string);

        Self {
            carrier,
            tracking,
            remarks: remarks.filter(|r| !r.is_empty()).map(str::to_string),
        }
    }
}
