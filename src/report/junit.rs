//! JUnit XML report transformer.
//!
//! JUnit XML is the de facto interchange format for CI systems. Every
//! assembly becomes one `<testsuite>`:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="0" skipped="1" time="1.234">
//!   <testsuite name="calc" id="3f1a..." tests="3" failures="1" errors="0" skipped="1" time="1.234" timestamp="2024-05-01T10:00:00+00:00">
//!     <testcase classname="calc" name="add" time="0.100"/>
//!     <testcase classname="calc" name="div" time="0.150">
//!       <failure message="exit status 1" type="failure">division by zero</failure>
//!     </testcase>
//!     <testcase classname="calc" name="slow" time="0.000">
//!       <skipped message="flaky on CI"/>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! Error messages not tied to a test case are written as `<error>` elements
//! of a synthetic `(errors)` test case so CI tools surface them.

use std::path::PathBuf;

use anyhow::Context;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::info;

use super::{AssembliesReport, AssemblyReport, ReportTransformer};
use crate::message::{TestFinished, TestOutcome};

/// Writes the report document as a JUnit XML file.
///
/// The file is created or overwritten; parent directories are created as
/// needed.
pub struct JunitTransformer {
    output_path: PathBuf,
}

impl JunitTransformer {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }

    /// Renders the document to an XML string.
    pub fn generate_xml(&self, report: &AssembliesReport) -> anyhow::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let totals = report.totals();
        let mut testsuites = BytesStart::new("testsuites");
        testsuites.push_attribute(("tests", totals.total.to_string().as_str()));
        testsuites.push_attribute(("failures", totals.failed.to_string().as_str()));
        testsuites.push_attribute(("errors", totals.errors.to_string().as_str()));
        testsuites.push_attribute((
            "skipped",
            (totals.skipped + totals.not_run).to_string().as_str(),
        ));
        testsuites.push_attribute(("time", format!("{:.3}", totals.time.as_secs_f64()).as_str()));
        writer.write_event(Event::Start(testsuites))?;

        for assembly in &report.assemblies {
            write_testsuite(&mut writer, assembly)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuites")))?;
        Ok(String::from_utf8(writer.into_inner())?)
    }
}

impl ReportTransformer for JunitTransformer {
    fn id(&self) -> &str {
        "junit"
    }

    fn transform(&self, report: &AssembliesReport) -> anyhow::Result<()> {
        let xml = self.generate_xml(report)?;

        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create output directory {}", parent.display())
            })?;
        }

        std::fs::write(&self.output_path, xml).with_context(|| {
            format!("Failed to write JUnit XML to {}", self.output_path.display())
        })?;
        info!("JUnit XML written to: {}", self.output_path.display());
        Ok(())
    }
}

fn write_testsuite<W: std::io::Write>(
    writer: &mut Writer<W>,
    assembly: &AssemblyReport,
) -> anyhow::Result<()> {
    let summary = &assembly.summary;
    let mut testsuite = BytesStart::new("testsuite");
    testsuite.push_attribute(("name", assembly.name.as_str()));
    testsuite.push_attribute(("id", assembly.unique_id.as_str()));
    testsuite.push_attribute(("tests", summary.total.to_string().as_str()));
    testsuite.push_attribute(("failures", summary.failed.to_string().as_str()));
    testsuite.push_attribute(("errors", summary.errors.to_string().as_str()));
    testsuite.push_attribute((
        "skipped",
        (summary.skipped + summary.not_run).to_string().as_str(),
    ));
    testsuite.push_attribute(("time", format!("{:.3}", summary.time.as_secs_f64()).as_str()));
    testsuite.push_attribute(("timestamp", assembly.run_date.to_rfc3339().as_str()));
    writer.write_event(Event::Start(testsuite))?;

    for result in &assembly.results {
        write_testcase(writer, &assembly.name, result)?;
    }

    if !assembly.errors.is_empty() {
        let mut testcase = BytesStart::new("testcase");
        testcase.push_attribute(("classname", assembly.name.as_str()));
        testcase.push_attribute(("name", "(errors)"));
        writer.write_event(Event::Start(testcase))?;
        for error in &assembly.errors {
            let mut element = BytesStart::new("error");
            element.push_attribute(("message", strip_invalid_xml(&error.message).as_str()));
            element.push_attribute(("type", strip_invalid_xml(&error.kind).as_str()));
            match &error.stack_trace {
                Some(trace) => {
                    writer.write_event(Event::Start(element))?;
                    writer.write_event(Event::Text(BytesText::new(&strip_invalid_xml(trace))))?;
                    writer.write_event(Event::End(BytesEnd::new("error")))?;
                }
                None => writer.write_event(Event::Empty(element))?,
            }
        }
        writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    Ok(())
}

fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    assembly_name: &str,
    result: &TestFinished,
) -> anyhow::Result<()> {
    let (classname, name) = parse_test_id(&result.test.unique_id);
    let classname = classname.unwrap_or_else(|| assembly_name.to_string());

    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", classname.as_str()));
    testcase.push_attribute(("name", name.as_str()));
    testcase.push_attribute((
        "time",
        format!("{:.3}", result.duration.as_secs_f64()).as_str(),
    ));

    let (element, reason) = match result.outcome {
        TestOutcome::Passed if result.output.is_empty() => {
            writer.write_event(Event::Empty(testcase))?;
            return Ok(());
        }
        TestOutcome::Passed => {
            writer.write_event(Event::Start(testcase))?;
            write_system_out(writer, &result.output)?;
            writer.write_event(Event::End(BytesEnd::new("testcase")))?;
            return Ok(());
        }
        TestOutcome::Failed => ("failure", result.reason.as_deref()),
        TestOutcome::Skipped => ("skipped", result.reason.as_deref()),
        TestOutcome::NotRun => ("skipped", Some("Not run")),
    };

    writer.write_event(Event::Start(testcase))?;

    let mut start = BytesStart::new(element);
    if let Some(reason) = reason {
        start.push_attribute(("message", strip_invalid_xml(reason).as_str()));
    }
    if result.outcome == TestOutcome::Failed {
        start.push_attribute(("type", "failure"));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&strip_invalid_xml(&result.output))))?;
        writer.write_event(Event::End(BytesEnd::new(element)))?;
    } else {
        writer.write_event(Event::Empty(start))?;
        if !result.output.is_empty() {
            write_system_out(writer, &result.output)?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

fn write_system_out<W: std::io::Write>(writer: &mut Writer<W>, output: &str) -> anyhow::Result<()> {
    writer.write_event(Event::Start(BytesStart::new("system-out")))?;
    writer.write_event(Event::Text(BytesText::new(&strip_invalid_xml(output))))?;
    writer.write_event(Event::End(BytesEnd::new("system-out")))?;
    Ok(())
}

/// Splits a test ID into classname and name.
///
/// `calc::ops::add` gives `(Some("calc.ops"), "add")`; an ID without a
/// `::` separator has no classname of its own.
fn parse_test_id(id: &str) -> (Option<String>, String) {
    match id.rfind("::") {
        Some(idx) => {
            let classname = id[..idx].replace("::", ".").replace('/', ".");
            (Some(classname), id[idx + 2..].to_string())
        }
        None => (None, id.to_string()),
    }
}

/// Drops characters XML 1.0 cannot represent. Escaping is left to the
/// writer.
fn strip_invalid_xml(s: &str) -> String {
    s.chars()
        .filter(|c| {
            matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
        })
        .collect()
}
