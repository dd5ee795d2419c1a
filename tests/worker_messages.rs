// tests/worker_messages.rs

use std::error::Error;

use eventdroid::errors::DroidError;
use eventdroid::supervisor::messages::{
    EXTRACTION_FAILURE, PARSE_FAILURE_ACRONYM, classify,
};
use eventdroid::supervisor::{DefaultMessageParser, MessageParser, WorkerMessage};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn tagged_result_id_is_found_anywhere_in_trailing_fields() -> TestResult {
    let p = DefaultMessageParser::new()?;
    assert_eq!(
        p.parse_result("/data/out/HITS.pool.root.1,ID:Range-00017,CPU:311,WALL:320")?,
        "Range-00017"
    );
    assert_eq!(p.parse_result("/x.root, ID: spaced-1 ,CPU:1")?, "spaced-1");
    Ok(())
}

#[test]
fn untagged_result_falls_back_to_third_field_from_end() -> TestResult {
    let p = DefaultMessageParser::new()?;
    assert_eq!(p.parse_result("/data/out.root,old-7,12.5,30")?, "old-7");
    Ok(())
}

#[test]
fn result_without_usable_id_fails() -> TestResult {
    let p = DefaultMessageParser::new()?;
    for msg in ["/data/out.root", "/a,/b,/c", "/data/out.root,ID:,CPU:1"] {
        let err = p.parse_result(msg).err().ok_or("expected parse failure")?;
        assert!(matches!(err, DroidError::ParseError(_)), "{}", msg);
    }
    Ok(())
}

#[test]
fn general_error_format() -> TestResult {
    let p = DefaultMessageParser::new()?;
    let r = p.parse_error("ERR_ATHENAMP_PROCESS Range-3: Failed to process event range");
    assert_eq!(r.acronym, "ERR_ATHENAMP_PROCESS");
    assert_eq!(r.event_range_id.as_deref(), Some("Range-3"));
    assert_eq!(r.diagnostics, "Failed to process event range");
    assert!(!r.is_fatal());
    Ok(())
}

#[test]
fn parse_failure_error_finds_embedded_id() -> TestResult {
    let p = DefaultMessageParser::new()?;
    let msg = format!(
        "{} {{u'eventRangeID': u'Range-9', u'LFN': u'EVNT.pool.root'}}: bad range",
        PARSE_FAILURE_ACRONYM
    );
    let r = p.parse_error(&msg);
    assert_eq!(r.acronym, PARSE_FAILURE_ACRONYM);
    assert_eq!(r.event_range_id.as_deref(), Some("Range-9"));
    assert_eq!(r.diagnostics, "bad range");

    let json_style = format!(
        "{} {{\"eventRangeID\": \"Range-10\", \"startEvent\": 1}}: no file",
        PARSE_FAILURE_ACRONYM
    );
    assert_eq!(
        p.parse_error(&json_style).event_range_id.as_deref(),
        Some("Range-10")
    );
    Ok(())
}

#[test]
fn parse_failure_without_embedded_id_has_no_id() -> TestResult {
    let p = DefaultMessageParser::new()?;
    let r = p.parse_error(&format!("{} garbage: what", PARSE_FAILURE_ACRONYM));
    assert_eq!(r.acronym, PARSE_FAILURE_ACRONYM);
    assert_eq!(r.event_range_id, None);
    Ok(())
}

#[test]
fn malformed_error_becomes_extraction_failure() -> TestResult {
    let p = DefaultMessageParser::new()?;
    let r = p.parse_error("ERR no structure here");
    assert_eq!(r.acronym, EXTRACTION_FAILURE);
    assert_eq!(r.event_range_id, None);
    assert_eq!(r.diagnostics, "ERR no structure here");
    Ok(())
}

#[test]
fn fatal_acronyms() -> TestResult {
    let p = DefaultMessageParser::new()?;
    assert!(p.parse_error("ERR_ATHENAMP_FATAL r-1: crashed").is_fatal());
    assert!(p.parse_error("ERR_TE_FATAL r-1: token extractor died").is_fatal());
    assert!(!p.parse_error("ERR_ATHENAMP_PROCESS r-1: crashed").is_fatal());
    Ok(())
}

#[test]
fn classification() -> TestResult {
    let p = DefaultMessageParser::new()?;
    assert_eq!(classify("Ready for events", &p)?, WorkerMessage::Ready);
    assert_eq!(
        classify("AthenaMP: Ready for events now", &p)?,
        WorkerMessage::Ready
    );
    assert_eq!(
        classify("/out.root,ID:r-1,CPU:1,WALL:1", &p)?,
        WorkerMessage::Result {
            event_range_id: "r-1".to_string()
        }
    );
    assert!(matches!(
        classify("ERR_ATHENAMP_PROCESS r-1: x", &p)?,
        WorkerMessage::Error(_)
    ));
    assert_eq!(classify("INFO all good", &p)?, WorkerMessage::Unrecognized);
    Ok(())
}

/// A parser for a different worker dialect can be swapped in.
struct PipeParser;

impl MessageParser for PipeParser {
    fn parse_result(&self, message: &str) -> eventdroid::errors::Result<String> {
        message
            .split('|')
            .nth(1)
            .map(str::to_string)
            .ok_or_else(|| DroidError::ParseError(message.to_string()))
    }

    fn parse_error(&self, message: &str) -> eventdroid::supervisor::ErrorReport {
        let mut parts = message.split('|');
        eventdroid::supervisor::ErrorReport {
            acronym: parts.next().unwrap_or_default().to_string(),
            event_range_id: parts.next().map(str::to_string),
            diagnostics: parts.next().unwrap_or_default().to_string(),
        }
    }
}

#[test]
fn custom_parser_plugs_into_classification() -> TestResult {
    assert_eq!(
        classify("/out.root|r-5", &PipeParser)?,
        WorkerMessage::Result {
            event_range_id: "r-5".to_string()
        }
    );
    match classify("ERR_X|r-6|bad", &PipeParser)? {
        WorkerMessage::Error(r) => assert_eq!(r.event_range_id.as_deref(), Some("r-6")),
        other => panic!("unexpected {:?}", other),
    }
    Ok(())
}
