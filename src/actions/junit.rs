//! JUnit XML report parsing (the format written by `pytest --junitxml`).

use std::time::Duration;

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::state::RunState;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Attribute(#[from] AttrError),

    #[error("no <testsuite> element found")]
    MissingTestSuite,

    #[error("invalid time '{0}' on test case")]
    InvalidTime(String),
}

/// One `<testcase>` element.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub classname: String,
    pub name: String,
    pub duration: Duration,
    pub state: RunState,
    /// Message and body of the marker that decided the state.
    pub output: Option<String>,
}

impl TestCase {
    /// `<class>.<test>`, with missing parts left empty.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.classname, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Marker {
    Error,
    Failure,
    Skipped,
}

impl Marker {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"error" => Some(Marker::Error),
            b"failure" => Some(Marker::Failure),
            b"skipped" => Some(Marker::Skipped),
            _ => None,
        }
    }

    fn state(self) -> RunState {
        match self {
            Marker::Error => RunState::Error,
            Marker::Failure => RunState::Failed,
            Marker::Skipped => RunState::Skipped,
        }
    }
}

struct PartialCase {
    classname: String,
    name: String,
    duration: Duration,
    markers: Vec<(Marker, Vec<String>)>,
}

impl PartialCase {
    fn start(e: &BytesStart<'_>) -> Result<Self, ReportError> {
        let duration = match attribute(e, b"time")? {
            Some(t) => parse_time(&t)?,
            None => Duration::ZERO,
        };
        Ok(Self {
            classname: attribute(e, b"classname")?.unwrap_or_default(),
            name: attribute(e, b"name")?.unwrap_or_default(),
            duration,
            markers: Vec::new(),
        })
    }

    fn open_marker(&mut self, marker: Marker, e: &BytesStart<'_>) -> Result<(), ReportError> {
        let message = attribute(e, b"message")?.into_iter().collect();
        self.markers.push((marker, message));
        Ok(())
    }

    fn append_text(&mut self, text: &str) {
        if let Some((_, parts)) = self.markers.last_mut() {
            if !text.trim().is_empty() {
                parts.push(text.to_string());
            }
        }
    }

    fn finish(mut self) -> TestCase {
        // Highest-precedence marker wins: error, then failure, then skipped.
        self.markers.sort_by_key(|(m, _)| *m);
        let (state, output) = match self.markers.into_iter().next() {
            Some((marker, parts)) => {
                let text = parts.join("\n");
                (marker.state(), (!text.is_empty()).then_some(text))
            }
            None => (RunState::Success, None),
        };
        TestCase {
            classname: self.classname,
            name: self.name,
            duration: self.duration,
            state,
            output,
        }
    }
}

/// Parse every test case in a JUnit XML document, in document order.
pub fn parse(xml: &str) -> Result<Vec<TestCase>, ReportError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut cases = Vec::new();
    let mut current: Option<PartialCase> = None;
    let mut in_marker = false;
    let mut saw_suite = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"testsuite" | b"testsuites" => saw_suite = true,
                b"testcase" => current = Some(PartialCase::start(&e)?),
                tag => {
                    if let (Some(marker), Some(case)) = (Marker::from_tag(tag), current.as_mut()) {
                        case.open_marker(marker, &e)?;
                        in_marker = true;
                    }
                }
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"testsuite" | b"testsuites" => saw_suite = true,
                b"testcase" => cases.push(PartialCase::start(&e)?.finish()),
                tag => {
                    if let (Some(marker), Some(case)) = (Marker::from_tag(tag), current.as_mut()) {
                        case.open_marker(marker, &e)?;
                    }
                }
            },
            Event::Text(t) => {
                if in_marker {
                    if let Some(case) = current.as_mut() {
                        case.append_text(&t.unescape()?);
                    }
                }
            }
            Event::CData(t) => {
                if in_marker {
                    if let Some(case) = current.as_mut() {
                        case.append_text(&String::from_utf8_lossy(&t.into_inner()));
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"testcase" => {
                    if let Some(case) = current.take() {
                        cases.push(case.finish());
                    }
                    in_marker = false;
                }
                tag if Marker::from_tag(tag).is_some() => in_marker = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_suite {
        return Err(ReportError::MissingTestSuite);
    }
    Ok(cases)
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, ReportError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn parse_time(raw: &str) -> Result<Duration, ReportError> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ReportError::InvalidTime(raw.to_string()))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ReportError::InvalidTime(raw.to_string()));
    }
    Ok(Duration::from_secs_f64(secs))
}
