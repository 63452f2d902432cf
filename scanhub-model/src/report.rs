//! Raw JSON report shapes produced by the analysis workers.
//!
//! The scanner writes one report per run into the result tarball; the diff
//! step derives added/fixed reports in the same shape. Field names mirror
//! the wire format exactly.

use serde::{Deserialize, Serialize};

use crate::defect::AnalyzerVersionPair;

/// Top-level report document (`scan-results.js` and the derived diffs).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanReport {
    #[serde(default)]
    pub scan: ReportMetadata,
    #[serde(default)]
    pub defects: Vec<ReportDefect>,
}

/// Scan-level metadata block of a report.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReportMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Analyzer versions used by the run, `name-version` keyed entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analyzers: Vec<AnalyzerVersionPair>,
    #[serde(
        default,
        rename = "lines-processed",
        skip_serializing_if = "Option::is_none"
    )]
    pub lines_processed: Option<i64>,
    #[serde(
        default,
        rename = "time-elapsed-analysis",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_elapsed_analysis: Option<String>,
}

/// One defect entry in a report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDefect {
    pub checker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<i64>,
    #[serde(
        default,
        rename = "defect_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub defect_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub key_event_idx: usize,
    pub events: Vec<ReportEvent>,
}

impl ReportDefect {
    /// The event that resulted in the defect.
    pub fn key_event(&self) -> Option<&ReportEvent> {
        self.events.get(self.key_event_idx)
    }

    /// Internal scanner warnings are noise, not findings.
    pub fn is_internal_warning(&self) -> bool {
        self.key_event()
            .is_some_and(|evt| evt.event == "internal warning")
    }
}

/// One event in a defect's trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEvent {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<i64>,
    pub event: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity_level: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scanner_report() {
        let raw = r#"{
            "scan": {
                "analyzers": [
                    {"name": "cppcheck", "version": "2.9"},
                    {"name": "gcc", "version": "11.3.1"}
                ],
                "lines-processed": 5231,
                "time-elapsed-analysis": "00:03:17"
            },
            "defects": [
                {
                    "checker": "RESOURCE_LEAK",
                    "cwe": 772,
                    "function": "load_config",
                    "key_event_idx": 1,
                    "events": [
                        {"file_name": "src/config.c", "line": 10,
                         "event": "alloc_fn", "message": "allocated here"},
                        {"file_name": "src/config.c", "line": 42,
                         "event": "leaked_storage",
                         "message": "variable going out of scope leaks it"}
                    ]
                }
            ]
        }"#;
        let report: ScanReport = serde_json::from_str(raw).unwrap();
        assert_eq!(report.scan.analyzers.len(), 2);
        assert_eq!(report.scan.lines_processed, Some(5231));
        let defect = &report.defects[0];
        assert_eq!(defect.checker, "RESOURCE_LEAK");
        assert_eq!(defect.key_event().unwrap().event, "leaked_storage");
        assert!(!defect.is_internal_warning());
    }

    #[test]
    fn flags_internal_warnings() {
        let defect = ReportDefect {
            checker: "COMPILER_WARNING".into(),
            annotation: None,
            cwe: None,
            defect_identifier: None,
            function: None,
            key_event_idx: 0,
            events: vec![ReportEvent {
                file_name: String::new(),
                line: 0,
                column: None,
                event: "internal warning".into(),
                message: "analyzer crashed".into(),
                verbosity_level: None,
            }],
        };
        assert!(defect.is_internal_warning());
    }
}
