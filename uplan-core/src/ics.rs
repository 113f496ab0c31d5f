use std::io::{BufReader, Cursor};

use ical::{
    parser::ical::{
        IcalParser,
        component::{IcalAlarm, IcalEvent},
    },
    property::Property,
};

use crate::{ClientKey, Course, Error, Result, UpstreamError, upstream::UpstreamClient};

const PRODID: &str = "-//uplan//Course Feed//EN";
const MAX_LINE_OCTETS: usize = 75;

/// Extracts the event components of a calendar document, in source order.
/// Every other component (timezones, todos, the wrapper's own properties)
/// is dropped.
pub fn parse_events(body: &[u8]) -> std::result::Result<Vec<IcalEvent>, UpstreamError> {
    let parser = IcalParser::new(BufReader::new(Cursor::new(body)));
    let mut calendars = 0usize;
    let mut events = Vec::new();

    for calendar in parser {
        let calendar = calendar.map_err(|e| UpstreamError::Malformed(e.to_string()))?;
        calendars += 1;
        events.extend(calendar.events);
    }

    if calendars == 0 {
        return Err(UpstreamError::Malformed(
            "calendar document without VCALENDAR".to_string(),
        ));
    }
    Ok(events)
}

/// Merges per-course calendars into one feed document.
#[derive(Debug, Clone, Default)]
pub struct CalendarAggregator;

impl CalendarAggregator {
    /// Stateless; every feed shares one.
    pub fn new() -> Self {
        Self
    }

    /// Fetches every course calendar in order and merges them. The first
    /// failing course aborts the whole feed.
    pub async fn aggregate(
        &self,
        upstream: &UpstreamClient,
        feed_path: &str,
        courses: &[Course],
        client: &ClientKey,
    ) -> Result<String> {
        let mut sources = Vec::with_capacity(courses.len());
        for course in courses {
            let events = upstream
                .course_calendar(course, client)
                .await
                .and_then(|body| parse_events(&body).map_err(Error::from))
                .map_err(|e| {
                    tracing::error!("Error fetching course {}: {}", course.label(), e);
                    Error::for_course(course.label(), e)
                })?;
            sources.push(events);
        }

        Ok(self.merge(feed_path, sources))
    }

    /// Concatenates the event lists under a single VCALENDAR wrapper.
    pub fn merge(&self, feed_path: &str, sources: Vec<Vec<IcalEvent>>) -> String {
        let mut out = String::new();

        push_line(&mut out, "BEGIN:VCALENDAR");
        push_line(&mut out, "VERSION:2.0");
        push_line(&mut out, &format!("PRODID:{PRODID}"));
        push_line(&mut out, "CALSCALE:GREGORIAN");
        push_line(&mut out, "METHOD:PUBLISH");
        push_line(&mut out, &format!("X-WR-CALNAME:uplan {feed_path}"));

        for event in sources.iter().flatten() {
            write_event(&mut out, event);
        }

        push_line(&mut out, "END:VCALENDAR");
        out
    }
}

fn write_event(out: &mut String, event: &IcalEvent) {
    push_line(out, "BEGIN:VEVENT");
    for property in &event.properties {
        push_line(out, &content_line(property));
    }
    for alarm in &event.alarms {
        write_alarm(out, alarm);
    }
    push_line(out, "END:VEVENT");
}

fn write_alarm(out: &mut String, alarm: &IcalAlarm) {
    push_line(out, "BEGIN:VALARM");
    for property in &alarm.properties {
        push_line(out, &content_line(property));
    }
    push_line(out, "END:VALARM");
}

/// `NAME;PARAM=a,b:value`, values passed through as received.
fn content_line(property: &Property) -> String {
    let mut line = property.name.clone();

    if let Some(params) = &property.params {
        for (name, values) in params {
            line.push(';');
            line.push_str(name);
            line.push('=');
            let values: Vec<String> = values.iter().map(|v| param_value(v)).collect();
            line.push_str(&values.join(","));
        }
    }

    line.push(':');
    if let Some(value) = &property.value {
        line.push_str(value);
    }
    line
}

fn param_value(value: &str) -> String {
    let quoted = value.len() >= 2 && value.starts_with('"') && value.ends_with('"');
    if !quoted && value.contains([':', ';', ',']) {
        format!("\"{value}\"")
    } else {
        value.to_string()
    }
}

/// Appends a content line, folded so no physical line exceeds 75 octets.
fn push_line(out: &mut String, line: &str) {
    let mut budget = MAX_LINE_OCTETS;
    let mut used = 0;

    for ch in line.chars() {
        let width = ch.len_utf8();
        if used + width > budget {
            out.push_str("\r\n ");
            // the leading space counts against the continuation line
            budget = MAX_LINE_OCTETS - 1;
            used = 0;
        }
        out.push(ch);
        used += width;
    }
    out.push_str("\r\n");
}
