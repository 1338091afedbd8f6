//! Semantic validation of decoded reports.
//!
//! Rules run top-down and stop at the first violation: `policy_published`, then
//! `report_metadata`, then every record in document order. An empty string stands
//! for an absent element, so "required" means "non-empty".

use crate::error::ValidationError;
use crate::models::{
    AlignmentMode, AuthResults, DateRange, DkimAuthResult, DkimVerdict, FailureOption,
    Identifiers, PolicyEvaluated, PolicyPublished, PolicyType, Record, Report, ReportMetadata,
    Row, SpfAuthResult, SpfScope, SpfVerdict, Verdict, WireValue,
};
use std::net::IpAddr;

type Outcome = Result<(), ValidationError>;

pub fn validate_report(report: &Report) -> Outcome {
    validate_policy_published(&report.policy_published)?;
    validate_metadata(&report.report_metadata)?;
    for (index, record) in report.records.iter().enumerate() {
        validate_record(&format!("record[{}]", index), record)?;
    }
    Ok(())
}

fn validate_policy_published(policy: &PolicyPublished) -> Outcome {
    required("policy_published.domain", &policy.domain)?;
    optional_one_of::<AlignmentMode>("policy_published.adkim", &policy.alignment_dkim)?;
    optional_one_of::<AlignmentMode>("policy_published.aspf", &policy.alignment_spf)?;
    required("policy_published.p", &policy.policy)?;
    one_of::<PolicyType>("policy_published.p", &policy.policy)?;
    optional_one_of::<PolicyType>("policy_published.sp", &policy.subdomain_policy)?;
    if !(0..=100).contains(&policy.percentage) {
        return Err(ValidationError::OutOfRange {
            field: "policy_published.pct".into(),
            min: 0,
            max: 100,
            got: policy.percentage,
        });
    }
    optional_one_of::<FailureOption>("policy_published.fo", &policy.failure_options)
}

fn validate_metadata(metadata: &ReportMetadata) -> Outcome {
    required("report_metadata.org_name", &metadata.org_name)?;
    required("report_metadata.email", &metadata.email)?;
    required("report_metadata.report_id", &metadata.report_id)?;
    validate_date_range(&metadata.date_range)
}

fn validate_date_range(range: &DateRange) -> Outcome {
    positive("report_metadata.date_range.begin", range.begin)?;
    positive("report_metadata.date_range.end", range.end)
}

fn validate_record(path: &str, record: &Record) -> Outcome {
    validate_auth_results(&format!("{}.auth_results", path), &record.auth_results)?;
    validate_identifiers(&format!("{}.identifiers", path), &record.identifiers)?;
    validate_row(&format!("{}.row", path), &record.row)
}

fn validate_auth_results(path: &str, results: &AuthResults) -> Outcome {
    for (index, dkim) in results.dkim.iter().enumerate() {
        validate_dkim(&format!("{}.dkim[{}]", path, index), dkim)?;
    }
    if results.spf.is_empty() {
        return Err(ValidationError::Missing {
            field: format!("{}.spf", path),
        });
    }
    for (index, spf) in results.spf.iter().enumerate() {
        validate_spf(&format!("{}.spf[{}]", path, index), spf)?;
    }
    Ok(())
}

/// The DKIM block is the one optional block in the schema: an all-empty block is
/// skipped, a partial one must be complete.
fn validate_dkim(path: &str, dkim: &DkimAuthResult) -> Outcome {
    if dkim.is_empty() {
        return Ok(());
    }
    required(&format!("{}.domain", path), &dkim.domain)?;
    required(&format!("{}.selector", path), &dkim.selector)?;
    required(&format!("{}.result", path), &dkim.result)?;
    one_of::<DkimVerdict>(&format!("{}.result", path), &dkim.result)
}

fn validate_spf(path: &str, spf: &SpfAuthResult) -> Outcome {
    required(&format!("{}.domain", path), &spf.domain)?;
    required(&format!("{}.result", path), &spf.result)?;
    optional_one_of::<SpfScope>(&format!("{}.scope", path), &spf.scope)?;
    one_of::<SpfVerdict>(&format!("{}.result", path), &spf.result)
}

fn validate_identifiers(path: &str, identifiers: &Identifiers) -> Outcome {
    required(&format!("{}.envelope_from", path), &identifiers.envelope_from)?;
    required(&format!("{}.header_from", path), &identifiers.header_from)
}

fn validate_row(path: &str, row: &Row) -> Outcome {
    let ip_field = format!("{}.source_ip", path);
    required(&ip_field, &row.source_ip)?;
    if row.source_ip.parse::<IpAddr>().is_err() {
        return Err(ValidationError::InvalidIp {
            field: ip_field,
            got: row.source_ip.clone(),
        });
    }
    if row.count < 1 {
        return Err(ValidationError::TooSmall {
            field: format!("{}.count", path),
            min: 1,
            got: row.count,
        });
    }
    validate_policy_evaluated(&format!("{}.policy_evaluated", path), &row.policy_evaluated)
}

fn validate_policy_evaluated(path: &str, evaluated: &PolicyEvaluated) -> Outcome {
    let disposition = format!("{}.disposition", path);
    required(&disposition, &evaluated.disposition)?;
    one_of::<PolicyType>(&disposition, &evaluated.disposition)?;
    optional_one_of::<Verdict>(&format!("{}.dkim", path), &evaluated.dkim)?;
    optional_one_of::<Verdict>(&format!("{}.spf", path), &evaluated.spf)
}

fn required(field: &str, value: &str) -> Outcome {
    if value.is_empty() {
        return Err(ValidationError::Missing {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn positive(field: &str, value: i64) -> Outcome {
    match value {
        0 => Err(ValidationError::Missing {
            field: field.to_string(),
        }),
        v if v < 0 => Err(ValidationError::TooSmall {
            field: field.to_string(),
            min: 1,
            got: v,
        }),
        _ => Ok(()),
    }
}

fn one_of<T: WireValue>(field: &str, value: &str) -> Outcome {
    match value.parse::<T>() {
        Ok(_) => Ok(()),
        Err(_) => Err(ValidationError::NotAllowed {
            field: field.to_string(),
            allowed: T::VALUES,
            got: value.to_string(),
        }),
    }
}

fn optional_one_of<T: WireValue>(field: &str, value: &str) -> Outcome {
    if value.is_empty() {
        return Ok(());
    }
    one_of::<T>(field, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_record() -> Record {
        Record {
            row: Row {
                source_ip: "192.0.2.1".into(),
                count: 1,
                policy_evaluated: PolicyEvaluated {
                    disposition: "none".into(),
                    dkim: "pass".into(),
                    spf: "pass".into(),
                },
            },
            identifiers: Identifiers {
                envelope_to: String::new(),
                envelope_from: "example.com".into(),
                header_from: "example.com".into(),
            },
            auth_results: AuthResults {
                dkim: vec![DkimAuthResult {
                    domain: "example.com".into(),
                    selector: "s1".into(),
                    result: "pass".into(),
                    human_result: String::new(),
                }],
                spf: vec![SpfAuthResult {
                    domain: "example.com".into(),
                    scope: "mfrom".into(),
                    result: "pass".into(),
                    human_result: String::new(),
                }],
            },
        }
    }

    fn valid_report() -> Report {
        Report {
            version: "1.0".into(),
            report_metadata: ReportMetadata {
                org_name: "receiver.example".into(),
                email: "dmarc@receiver.example".into(),
                extra_contact_info: String::new(),
                report_id: "r-1".into(),
                date_range: DateRange {
                    begin: 1700000000,
                    end: 1700086400,
                },
            },
            policy_published: PolicyPublished {
                domain: "example.com".into(),
                alignment_dkim: "r".into(),
                alignment_spf: "s".into(),
                policy: "reject".into(),
                subdomain_policy: String::new(),
                percentage: 100,
                failure_options: "d".into(),
            },
            records: vec![valid_record()],
        }
    }

    fn field_of(report: &Report) -> String {
        validate_report(report).unwrap_err().field().to_string()
    }

    #[test]
    fn test_valid_report_passes() {
        assert_eq!(validate_report(&valid_report()), Ok(()));
    }

    #[test]
    fn test_report_without_records_passes() {
        let mut report = valid_report();
        report.records.clear();
        assert!(validate_report(&report).is_ok());
    }

    #[test]
    fn test_missing_domain_is_reported_first() {
        let mut report = valid_report();
        report.policy_published.domain.clear();
        // Later blocks are broken too; the policy block must win.
        report.report_metadata.org_name.clear();
        report.records[0].row.count = 0;
        assert_eq!(
            validate_report(&report),
            Err(ValidationError::Missing {
                field: "policy_published.domain".into()
            })
        );
    }

    #[test]
    fn test_metadata_checked_before_records() {
        let mut report = valid_report();
        report.report_metadata.report_id.clear();
        report.records[0].row.source_ip = "bogus".into();
        assert_eq!(field_of(&report), "report_metadata.report_id");
    }

    #[test]
    fn test_percentage_bounds() {
        for (pct, ok) in [(-1, false), (0, true), (100, true), (101, false)] {
            let mut report = valid_report();
            report.policy_published.percentage = pct;
            assert_eq!(validate_report(&report).is_ok(), ok, "pct {}", pct);
        }
        let mut report = valid_report();
        report.policy_published.percentage = 101;
        assert_eq!(
            validate_report(&report).unwrap_err().to_string(),
            "policy_published.pct must be between 0 and 100, got: 101"
        );
    }

    #[test]
    fn test_policy_required_and_enumerated() {
        let mut report = valid_report();
        report.policy_published.policy.clear();
        assert_eq!(field_of(&report), "policy_published.p");

        report.policy_published.policy = "block".into();
        let err = validate_report(&report).unwrap_err();
        assert_eq!(
            err.to_string(),
            "policy_published.p must be one of [none, quarantine, reject], got: block"
        );
    }

    #[test]
    fn test_optional_policy_fields() {
        let mut report = valid_report();
        report.policy_published.alignment_dkim = "x".into();
        assert_eq!(field_of(&report), "policy_published.adkim");

        let mut report = valid_report();
        report.policy_published.subdomain_policy = "drop".into();
        assert_eq!(field_of(&report), "policy_published.sp");

        let mut report = valid_report();
        report.policy_published.failure_options = "2".into();
        assert_eq!(field_of(&report), "policy_published.fo");

        let mut report = valid_report();
        report.policy_published.alignment_spf.clear();
        report.policy_published.failure_options.clear();
        assert!(validate_report(&report).is_ok());
    }

    #[test]
    fn test_date_range() {
        let mut report = valid_report();
        report.report_metadata.date_range.begin = 0;
        assert_eq!(field_of(&report), "report_metadata.date_range.begin");

        let mut report = valid_report();
        report.report_metadata.date_range.end = -5;
        assert_eq!(field_of(&report), "report_metadata.date_range.end");
    }

    #[test]
    fn test_count_boundary() {
        let mut report = valid_report();
        report.records[0].row.count = 0;
        assert_eq!(field_of(&report), "record[0].row.count");
        report.records[0].row.count = 1;
        assert!(validate_report(&report).is_ok());
    }

    #[test]
    fn test_source_ip_forms() {
        for ip in ["192.0.2.1", "2001:db8::1"] {
            let mut report = valid_report();
            report.records[0].row.source_ip = ip.into();
            assert!(validate_report(&report).is_ok(), "{} should pass", ip);
        }
        let mut report = valid_report();
        report.records[0].row.source_ip = "not-an-ip".into();
        assert_eq!(
            validate_report(&report),
            Err(ValidationError::InvalidIp {
                field: "record[0].row.source_ip".into(),
                got: "not-an-ip".into()
            })
        );
    }

    #[test]
    fn test_disposition_required_but_verdicts_optional() {
        let mut report = valid_report();
        report.records[0].row.policy_evaluated.dkim.clear();
        report.records[0].row.policy_evaluated.spf.clear();
        assert!(validate_report(&report).is_ok());

        report.records[0].row.policy_evaluated.disposition.clear();
        assert_eq!(field_of(&report), "record[0].row.policy_evaluated.disposition");

        let mut report = valid_report();
        report.records[0].row.policy_evaluated.spf = "softfail".into();
        assert_eq!(field_of(&report), "record[0].row.policy_evaluated.spf");
    }

    #[test]
    fn test_dkim_block_optional_but_complete() {
        let mut report = valid_report();
        report.records[0].auth_results.dkim = vec![DkimAuthResult::default()];
        assert!(validate_report(&report).is_ok());

        report.records[0].auth_results.dkim.clear();
        assert!(validate_report(&report).is_ok());

        report.records[0].auth_results.dkim = vec![DkimAuthResult {
            domain: "example.com".into(),
            ..Default::default()
        }];
        assert_eq!(field_of(&report), "record[0].auth_results.dkim[0].selector");

        report.records[0].auth_results.dkim[0].selector = "s1".into();
        report.records[0].auth_results.dkim[0].result = "softfail".into();
        assert_eq!(field_of(&report), "record[0].auth_results.dkim[0].result");
    }

    #[test]
    fn test_spf_block_required() {
        let mut report = valid_report();
        report.records[0].auth_results.spf.clear();
        assert_eq!(field_of(&report), "record[0].auth_results.spf");

        let mut report = valid_report();
        report.records[0].auth_results.spf = vec![SpfAuthResult::default()];
        assert_eq!(field_of(&report), "record[0].auth_results.spf[0].domain");

        let mut report = valid_report();
        report.records[0].auth_results.spf[0].scope = "rcpt".into();
        assert_eq!(field_of(&report), "record[0].auth_results.spf[0].scope");

        let mut report = valid_report();
        report.records[0].auth_results.spf[0].result = "policy".into();
        assert_eq!(field_of(&report), "record[0].auth_results.spf[0].result");
    }

    #[test]
    fn test_every_spf_entry_is_checked() {
        let mut report = valid_report();
        let helo = SpfAuthResult {
            domain: "mx.example.com".into(),
            scope: "helo".into(),
            result: "none".into(),
            human_result: String::new(),
        };
        report.records[0].auth_results.spf.insert(0, helo);
        assert!(validate_report(&report).is_ok());

        report.records[0].auth_results.spf[1].result.clear();
        assert_eq!(field_of(&report), "record[0].auth_results.spf[1].result");
    }

    #[test]
    fn test_record_block_order() {
        let mut report = valid_report();
        report.records[0].row.count = 0;
        report.records[0].identifiers.header_from.clear();
        report.records[0].auth_results.spf[0].domain.clear();
        assert_eq!(field_of(&report), "record[0].auth_results.spf[0].domain");

        report.records[0].auth_results.spf[0].domain = "example.com".into();
        assert_eq!(field_of(&report), "record[0].identifiers.header_from");
    }

    #[test]
    fn test_records_checked_in_order() {
        let mut report = valid_report();
        let mut broken = valid_record();
        broken.identifiers.envelope_from.clear();
        report.records.push(broken.clone());
        report.records.push(broken);
        assert_eq!(field_of(&report), "record[1].identifiers.envelope_from");
    }
}
