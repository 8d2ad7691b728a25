//! Conversion between generic record sets and validated wire records.
//!
//! The resolver never stores a [`ResourceRecordSet`] directly: every set is
//! pushed through an [`RrCodec`] first so that malformed data is rejected at
//! apply time (non-retryably) rather than surfacing at query time.

use crate::core::{RecordType, ResourceRecord, ResourceRecordSet};
use crate::names::fqdn;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

/// One validated record in canonical presentation form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub ttl: u32,
    pub rdata: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("record set {name} {record_type} contains no records")]
    Empty { name: String, record_type: RecordType },

    #[error("invalid domain name '{0}'")]
    InvalidName(String),

    #[error("unsupported record type for {0}")]
    UnsupportedType(String),

    #[error("invalid {record_type} rdata '{value}' for {name}: {reason}")]
    InvalidRdata {
        name: String,
        record_type: RecordType,
        value: String,
        reason: String,
    },

    #[error("wire records for one set disagree on name or type")]
    Mixed,
}

/// Turns record sets into validated wire records and back.
pub trait RrCodec: Send + Sync {
    /// Validates and encodes a record set.
    fn encode(&self, rrset: &ResourceRecordSet) -> Result<Vec<WireRecord>, CodecError>;

    /// Rebuilds a record set from its wire records.
    fn decode(&self, records: &[WireRecord]) -> Result<ResourceRecordSet, CodecError>;
}

/// A codec over presentation-format rdata strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextRrCodec;

impl RrCodec for TextRrCodec {
    fn encode(&self, rrset: &ResourceRecordSet) -> Result<Vec<WireRecord>, CodecError> {
        let name = validate_name(&rrset.name)?;
        if rrset.record_type == RecordType::Unspecified {
            return Err(CodecError::UnsupportedType(name));
        }
        if rrset.records.is_empty() {
            return Err(CodecError::Empty {
                name,
                record_type: rrset.record_type,
            });
        }
        if rrset.record_type == RecordType::Cname && rrset.records.len() > 1 {
            return Err(CodecError::InvalidRdata {
                name,
                record_type: RecordType::Cname,
                value: rrset.records.len().to_string(),
                reason: "a CNAME set holds exactly one record".to_string(),
            });
        }

        rrset
            .records
            .iter()
            .map(|record| {
                let rdata = canonical_rdata(&name, rrset.record_type, &record.value)?;
                Ok(WireRecord {
                    name: name.clone(),
                    record_type: rrset.record_type,
                    ttl: rrset.ttl,
                    rdata,
                })
            })
            .collect()
    }

    fn decode(&self, records: &[WireRecord]) -> Result<ResourceRecordSet, CodecError> {
        let first = records.first().ok_or_else(|| CodecError::Empty {
            name: String::new(),
            record_type: RecordType::Unspecified,
        })?;
        if records
            .iter()
            .any(|r| r.name != first.name || r.record_type != first.record_type)
        {
            return Err(CodecError::Mixed);
        }
        Ok(ResourceRecordSet {
            name: first.name.clone(),
            record_type: first.record_type,
            ttl: first.ttl,
            records: records
                .iter()
                .map(|r| ResourceRecord::new(r.rdata.clone()))
                .collect(),
        })
    }
}

/// Normalizes `name` and checks label and total length limits.
pub fn validate_name(name: &str) -> Result<String, CodecError> {
    let normalized = fqdn(name);
    if normalized == "." {
        return Ok(normalized);
    }
    if normalized.len() > MAX_NAME_LEN {
        return Err(CodecError::InvalidName(name.to_string()));
    }
    let body = normalized.trim_end_matches('.');
    let labels_ok = body
        .split('.')
        .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LEN && !label.contains(' '));
    if !labels_ok {
        return Err(CodecError::InvalidName(name.to_string()));
    }
    Ok(normalized)
}

fn canonical_rdata(name: &str, record_type: RecordType, value: &str) -> Result<String, CodecError> {
    let invalid = |reason: &str| CodecError::InvalidRdata {
        name: name.to_string(),
        record_type,
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let value = value.trim();
    let fields: Vec<&str> = value.split_whitespace().collect();

    match record_type {
        RecordType::A => value
            .parse::<Ipv4Addr>()
            .map(|ip| ip.to_string())
            .map_err(|_| invalid("not an IPv4 address")),
        RecordType::Aaaa => value
            .parse::<Ipv6Addr>()
            .map(|ip| ip.to_string())
            .map_err(|_| invalid("not an IPv6 address")),
        RecordType::Cname | RecordType::Ns | RecordType::Ptr => {
            validate_name(value).map_err(|_| invalid("not a domain name"))
        }
        RecordType::Mx => match fields.as_slice() {
            [pref, exchange] => {
                let pref: u16 = pref.parse().map_err(|_| invalid("bad preference"))?;
                let exchange = validate_name(exchange).map_err(|_| invalid("bad exchange"))?;
                Ok(format!("{} {}", pref, exchange))
            }
            _ => Err(invalid("expected '<preference> <exchange>'")),
        },
        RecordType::Srv => match fields.as_slice() {
            [priority, weight, port, target] => {
                let priority: u16 = priority.parse().map_err(|_| invalid("bad priority"))?;
                let weight: u16 = weight.parse().map_err(|_| invalid("bad weight"))?;
                let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;
                let target = validate_name(target).map_err(|_| invalid("bad target"))?;
                Ok(format!("{} {} {} {}", priority, weight, port, target))
            }
            _ => Err(invalid("expected '<priority> <weight> <port> <target>'")),
        },
        RecordType::Soa => match fields.as_slice() {
            [mname, rname, numbers @ ..] if numbers.len() == 5 => {
                let mname = validate_name(mname).map_err(|_| invalid("bad mname"))?;
                let rname = validate_name(rname).map_err(|_| invalid("bad rname"))?;
                let numbers = numbers
                    .iter()
                    .map(|n| n.parse::<u32>().map_err(|_| invalid("bad timer value")))
                    .collect::<Result<Vec<_>, _>>()?;
                let numbers: Vec<String> = numbers.iter().map(u32::to_string).collect();
                Ok(format!("{} {} {}", mname, rname, numbers.join(" ")))
            }
            _ => Err(invalid(
                "expected '<mname> <rname> <serial> <refresh> <retry> <expire> <minimum>'",
            )),
        },
        RecordType::Caa => match fields.as_slice() {
            [flags, tag, rest @ ..] if !rest.is_empty() => {
                let flags: u8 = flags.parse().map_err(|_| invalid("bad flags"))?;
                Ok(format!("{} {} {}", flags, tag.to_ascii_lowercase(), rest.join(" ")))
            }
            _ => Err(invalid("expected '<flags> <tag> <value>'")),
        },
        RecordType::Txt => {
            if value.is_empty() {
                Err(invalid("empty text"))
            } else {
                Ok(value.to_string())
            }
        }
        RecordType::Unspecified => Err(CodecError::UnsupportedType(name.to_string())),
    }
}
