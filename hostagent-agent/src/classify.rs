//! Classifiers turning raw log records into [`Event`]s.
//!
//! These are deliberately thin stand-ins for the out-of-scope XID/SXID catalogues (§1
//! Non-goals): a handful of named filters built on [`hostagent_core::FilterSet`] — the same
//! compiled regex-or-substring engine the Log Streamer's parsers rely on — rather than a
//! bespoke rules engine. A real deployment would load its filter catalogue from configuration;
//! this module only demonstrates the wiring.

use hostagent_core::event::{Event, EventType};
use hostagent_core::event_processor::MatchFn;
use hostagent_core::filter::{FilterSet, FilterSpec};
use hostagent_core::record::LogRecord;
use hostagent_core::Error;

/// Xid 79 ("GPU has fallen off the bus") is unrecoverable without a reset; the listed
/// double-bit-ECC and NVSwitch codes are recorded as critical; every other Xid the driver
/// emits is still recorded, only at warning severity.
fn kernel_filter_set() -> Result<FilterSet, Error> {
    FilterSet::new(vec![
        FilterSpec {
            name: "xid-fatal".into(),
            regex_pattern: Some(r"Xid\s+79\b".into()),
            substring: None,
            owners: vec![],
        },
        FilterSpec {
            name: "xid-critical".into(),
            regex_pattern: Some(r"Xid\s+(48|63|64|74|94|95)\b".into()),
            substring: None,
            owners: vec![],
        },
        FilterSpec {
            name: "xid-any".into(),
            regex_pattern: Some(r"Xid\s+\d+".into()),
            substring: None,
            owners: vec![],
        },
    ])
}

/// Classifies kernel-log records against a small, fixed Xid severity catalogue.
pub struct KernelClassifier {
    filters: FilterSet,
}

impl KernelClassifier {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            filters: kernel_filter_set()?,
        })
    }
}

impl MatchFn for KernelClassifier {
    fn classify(&self, record: &LogRecord) -> Option<Event> {
        // Checked most-severe-first: a line matching `xid-fatal` also matches `xid-any`, but
        // only the most specific filter's name and severity should be recorded.
        let matching = self.filters.matching(&record.content);
        let hit = matching
            .iter()
            .find(|f| f.name == "xid-fatal")
            .or_else(|| matching.iter().find(|f| f.name == "xid-critical"))
            .or_else(|| matching.iter().find(|f| f.name == "xid-any"))?;

        let event_type = match hit.name.as_str() {
            "xid-fatal" => EventType::Fatal,
            "xid-critical" => EventType::Critical,
            _ => EventType::Warning,
        };
        Some(Event::new(
            record.timestamp,
            event_type,
            xid_event_name(&record.content).unwrap_or_else(|| hit.name.clone()),
            &record.content,
        ))
    }
}

fn xid_event_name(content: &str) -> Option<String> {
    let idx = content.find("Xid")?;
    let rest = &content[idx + 3..];
    let code: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!code.is_empty()).then(|| format!("xid-{code}"))
}

/// Classifies fabric-manager log records by their decoded severity level.
pub struct FabricManagerClassifier;

impl MatchFn for FabricManagerClassifier {
    fn classify(&self, record: &LogRecord) -> Option<Event> {
        if record.level.eq_ignore_ascii_case("ERROR") || record.level.eq_ignore_ascii_case("FATAL")
        {
            Some(Event::new(
                record.timestamp,
                EventType::Critical,
                "fabricmanager",
                &record.content,
            ))
        } else {
            None
        }
    }
}
