//! Temporal annotation of observation text
//!
//! Observations are written once but read much later, so absolute dates in
//! the text drift out of context. At render time (never persisted) this
//! module rewrites two kinds of references against the current date:
//! inline "(estimated <date>)" / "(meaning <date>)" annotations, and
//! date-header lines, with synthetic gap markers between headers.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

fn inline_annotation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((estimated|meaning)\s+([^)]{1,60})\)").unwrap())
}

fn future_intent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(will|plans?\s+to|going\s+to|needs?\s+to|intends?\s+to|scheduled\s+to|should)\b")
            .unwrap()
    })
}

fn date_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "Date: Feb 12, 2026" or "## Feb 12, 2026", alone on the line
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:(?:#{1,4}\s+)|(?:date:\s*))(.+?)\s*$").unwrap()
    })
}

fn vague_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(early|mid|late)\s+([a-z]+)\.?\s+(\d{4})$").unwrap())
}

fn month_day_year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "Feb 12, 2026", "February 12 2026", range "Feb 12-14, 2026" (start wins)
    RE.get_or_init(|| {
        Regex::new(r"(?i)^([a-z]+)\.?\s+(\d{1,2})(?:\s*[-–]\s*\d{1,2})?\s*,?\s+(\d{4})$").unwrap()
    })
}

fn iso_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap())
}

/// Rewrite date references in `text` relative to `today`.
pub fn annotate(text: &str, today: NaiveDate) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut last_header_date: Option<NaiveDate> = None;

    for line in text.lines() {
        if let Some(date) = parse_header_line(line) {
            if let Some(prev) = last_header_date {
                let gap = (date - prev).num_days();
                if gap > 1 {
                    out.push(format!("[{} later]", duration_phrase(gap)));
                }
            }
            last_header_date = Some(date);
            out.push(format!("{} ({})", line.trim_end(), relative_phrase(date, today)));
        } else {
            out.push(annotate_inline(line, today));
        }
    }

    out.join("\n")
}

/// Annotate inline "(estimated ...)" / "(meaning ...)" references on a line.
fn annotate_inline(line: &str, today: NaiveDate) -> String {
    let re = inline_annotation_re();
    let mut result = String::new();
    let mut cursor = 0;

    for caps in re.captures_iter(line) {
        let whole = caps.get(0).unwrap();
        let keyword = &caps[1];
        let date_text = caps[2].trim();

        result.push_str(&line[cursor..whole.start()]);

        match parse_date_text(date_text) {
            Some(date) => {
                let mut phrase = relative_phrase(date, today);
                // A past date after future-intent wording means the plan's
                // time has come and gone
                if date < today && future_intent_re().is_match(&line[..whole.start()]) {
                    phrase.push_str(", likely already happened");
                }
                result.push_str(&format!("({keyword} {date_text}; {phrase})"));
            }
            None => result.push_str(whole.as_str()),
        }
        cursor = whole.end();
    }
    result.push_str(&line[cursor..]);
    result
}

/// Parse a date-header line, returning its date.
fn parse_header_line(line: &str) -> Option<NaiveDate> {
    let caps = date_header_re().captures(line)?;
    parse_date_text(caps[1].trim())
}

/// Parse supported date spellings: exact, ISO, range start, vague modifier.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    if let Some(caps) = iso_date_re().captures(text) {
        return NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }

    if let Some(caps) = vague_date_re().captures(text) {
        let day = match caps[1].to_lowercase().as_str() {
            "early" => 7,
            "mid" => 15,
            _ => 23,
        };
        let month = month_number(&caps[2])?;
        return NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, day);
    }

    if let Some(caps) = month_day_year_re().captures(text) {
        let month = month_number(&caps[1])?;
        return NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, caps[2].parse().ok()?);
    }

    None
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_lowercase();
    MONTHS
        .iter()
        .position(|m| lower.starts_with(m))
        .map(|i| i as u32 + 1)
}

/// Phrase a date relative to `today`: "yesterday", "3 days ago", "in 2 weeks".
pub fn relative_phrase(date: NaiveDate, today: NaiveDate) -> String {
    let delta = (date - today).num_days();
    match delta {
        0 => "today".to_string(),
        -1 => "yesterday".to_string(),
        1 => "tomorrow".to_string(),
        d if d < 0 => format!("{} ago", duration_phrase(-d)),
        d => format!("in {}", duration_phrase(d)),
    }
}

/// Bucket a positive day count into days/weeks/months/years.
fn duration_phrase(days: i64) -> String {
    debug_assert!(days > 0);
    if days < 7 {
        plural(days, "day")
    } else if days < 30 {
        plural(days / 7, "week")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        plural(days / 365, "year")
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}
