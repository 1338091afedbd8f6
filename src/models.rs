//! Data Models Module
//!
//! This module defines the structures a DMARC aggregate report decodes into. Field
//! names on the wire follow the DMARC aggregate report schema exactly (`report_metadata`,
//! `policy_published`, `record`, ...); the Rust names are allowed to be more descriptive.
//!
//! Values with an enumerated domain (policies, verdicts, alignment modes) are kept as
//! the raw strings found in the document so a stored report reproduces its source. The
//! enums at the bottom of this module describe the allowed values and are what
//! validation checks against.
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Report {
    pub version: String,
    pub report_metadata: ReportMetadata,
    pub policy_published: PolicyPublished,
    #[serde(rename = "record")]
    pub records: Vec<Record>,
}

impl Report {
    pub fn report_id(&self) -> &str {
        &self.report_metadata.report_id
    }

    /// Same report with the records dropped, which is what storage keeps per report row.
    pub fn header(&self) -> Report {
        Report {
            version: self.version.clone(),
            report_metadata: self.report_metadata.clone(),
            policy_published: self.policy_published.clone(),
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ReportMetadata {
    pub org_name: String,
    pub email: String,
    pub extra_contact_info: String,
    pub report_id: String,
    pub date_range: DateRange,
}

/// Reporting window in seconds since the epoch.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DateRange {
    #[serde(deserialize_with = "lenient_int")]
    pub begin: i64,
    #[serde(deserialize_with = "lenient_int")]
    pub end: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PolicyPublished {
    pub domain: String,
    #[serde(rename = "adkim")]
    pub alignment_dkim: String,
    #[serde(rename = "aspf")]
    pub alignment_spf: String,
    #[serde(rename = "p")]
    pub policy: String,
    #[serde(rename = "sp")]
    pub subdomain_policy: String,
    #[serde(rename = "pct", deserialize_with = "lenient_int")]
    pub percentage: i64,
    #[serde(rename = "fo")]
    pub failure_options: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Record {
    pub row: Row,
    pub identifiers: Identifiers,
    pub auth_results: AuthResults,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Row {
    pub source_ip: String,
    #[serde(deserialize_with = "lenient_int")]
    pub count: i64,
    pub policy_evaluated: PolicyEvaluated,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PolicyEvaluated {
    pub disposition: String,
    pub dkim: String,
    pub spf: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Identifiers {
    pub envelope_to: String,
    pub envelope_from: String,
    pub header_from: String,
}

/// Raw authentication results. Both blocks may repeat: a message can carry several
/// DKIM signatures, and receivers often report `helo` and `mfrom` SPF checks side by
/// side. An empty `dkim` list means no DKIM block was reported.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AuthResults {
    pub dkim: Vec<DkimAuthResult>,
    pub spf: Vec<SpfAuthResult>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DkimAuthResult {
    pub domain: String,
    pub selector: String,
    pub result: String,
    pub human_result: String,
}

impl DkimAuthResult {
    pub fn is_empty(&self) -> bool {
        self.domain.is_empty() && self.selector.is_empty() && self.result.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SpfAuthResult {
    pub domain: String,
    pub scope: String,
    pub result: String,
    pub human_result: String,
}

/// Integer element whose text may be empty or padded. Empty text reads as 0.
fn lenient_int<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    text.parse().map_err(serde::de::Error::custom)
}

/// A closed set of values an element may take on the wire.
pub trait WireValue: FromStr {
    const VALUES: &'static [&'static str];
}

macro_rules! wire_value {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl WireValue for $name {
            const VALUES: &'static [&'static str] = &[$($text),+];
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($name), s)),
                }
            }
        }
    };
}

wire_value! {
    /// `adkim` / `aspf`: relaxed or strict identifier alignment.
    AlignmentMode {
        Relaxed => "r",
        Strict => "s",
    }
}

wire_value! {
    /// `p`, `sp` and the evaluated `disposition`.
    PolicyType {
        None => "none",
        Quarantine => "quarantine",
        Reject => "reject",
    }
}

wire_value! {
    /// `fo`: when the sender asked for failure reports.
    FailureOption {
        AllFail => "0",
        AnyFail => "1",
        DkimFail => "d",
        SpfFail => "s",
    }
}

wire_value! {
    /// DMARC-aligned verdict inside `policy_evaluated`.
    Verdict {
        Pass => "pass",
        Fail => "fail",
    }
}

wire_value! {
    DkimVerdict {
        Pass => "pass",
        Fail => "fail",
        None => "none",
        Neutral => "neutral",
        Policy => "policy",
        PermError => "permerror",
        TempError => "temperror",
    }
}

wire_value! {
    SpfVerdict {
        Pass => "pass",
        Fail => "fail",
        None => "none",
        Neutral => "neutral",
        SoftFail => "softfail",
        PermError => "permerror",
        TempError => "temperror",
    }
}

wire_value! {
    SpfScope {
        MailFrom => "mfrom",
        Helo => "helo",
    }
}
