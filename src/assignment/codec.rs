//! Work-queue line codec: `Tag=[id,]field,field,...`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

use crate::assignment::model::{Assignment, AssignmentBuilder, WorkType, DEFAULT_SIEVE_DEPTH};

static WORK_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(Test|DoubleCheck|PRP(?:DC)?|P[Ff]actor|P[Mm]inus1|Cert)\s*=\s*(?:(([0-9A-F]{32})|[Nn]/[Aa]|0),)?(?:(?:-?[0-9]+(?:\.[0-9]+)?|"[0-9]+(?:,[0-9]+)*")(?:,|$)){3,9}$"#,
    )
    .expect("work line pattern compiles")
});

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    Structure { line: String },
    MissingField { field: &'static str },
    InvalidNumber { field: &'static str, value: String },
    CompositeExponent { exponent: u64 },
    BoundTooSmall { exponent: u64, b1: u64 },
    BoundsInverted { b1: u64, b2: u64 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Structure { line } => {
                write!(f, "not a recognizable assignment line: {line:?}")
            }
            ParseError::MissingField { field } => write!(f, "assignment is missing field {field}"),
            ParseError::InvalidNumber { field, value } => {
                write!(f, "assignment field {field} has invalid value {value:?}")
            }
            ParseError::CompositeExponent { exponent } => {
                write!(f, "exponent {exponent} is composite")
            }
            ParseError::BoundTooSmall { exponent, b1 } => {
                write!(f, "P-1 on exponent {exponent} has B1={b1} below 50000")
            }
            ParseError::BoundsInverted { b1, b2 } => write!(f, "B2={b2} is below B1={b1}"),
        }
    }
}

impl std::error::Error for ParseError {}

struct Fields {
    values: Vec<String>,
}

impl Fields {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn raw(&self, index: usize, field: &'static str) -> Result<&str, ParseError> {
        self.values
            .get(index)
            .map(String::as_str)
            .ok_or(ParseError::MissingField { field })
    }

    fn num<T: FromStr>(&self, index: usize, field: &'static str) -> Result<T, ParseError> {
        let raw = self.raw(index, field)?;
        raw.parse().map_err(|_| ParseError::InvalidNumber {
            field,
            value: raw.to_owned(),
        })
    }

    /// Integer flag as written by the engines (`0`/`1`).
    fn flag(&self, index: usize, field: &'static str) -> Result<bool, ParseError> {
        Ok(self.num::<i64>(index, field)? != 0)
    }
}

/// Splits a comma list where double-quoted segments may contain commas.
fn split_fields(text: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in text.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    fields.push(current);
    fields
}

pub fn parse_line(line: &str) -> Result<Assignment, ParseError> {
    let line = line.trim_end();
    let captures = WORK_LINE.captures(line).ok_or_else(|| ParseError::Structure {
        line: line.to_owned(),
    })?;
    let tag = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let id = captures.get(3).map(|m| m.as_str().to_owned());
    let body = line
        .split_once('=')
        .map(|(_, rest)| rest.trim_start())
        .unwrap_or_default();
    let mut values = split_fields(body);
    if captures.get(2).is_some() {
        values.remove(0);
    }
    let fields = Fields { values };

    let builder = match tag {
        "Test" | "DoubleCheck" => {
            let work_type = if tag == "Test" {
                WorkType::FirstLl
            } else {
                WorkType::DoubleCheckLl
            };
            AssignmentBuilder::new(work_type, fields.num(0, "exponent")?)
                .sieve_depth(fields.num(1, "sieve_depth")?)
                .pminus1_done(fields.flag(2, "pminus1_done")?)
        }
        "PRP" | "PRPDC" => {
            let mut builder = candidate(&fields, WorkType::Prp)?.prp_double_check(tag == "PRPDC");
            let mut next = 4;
            if fields.len() >= 6 {
                builder = builder
                    .sieve_depth(fields.num(4, "sieve_depth")?)
                    .tests_saved(fields.num(5, "tests_saved")?);
                next = 6;
                if fields.len() >= 8 {
                    builder = builder.prp_options(
                        fields.num(6, "prp_base")?,
                        fields.num(7, "residue_type")?,
                    );
                    next = 8;
                }
            }
            if fields.len() > next {
                builder = builder.known_factors(Some(fields.raw(next, "known_factors")?.to_owned()));
            }
            builder
        }
        "PFactor" | "Pfactor" => candidate(&fields, WorkType::PFactor)?
            .sieve_depth(fields.num(4, "sieve_depth")?)
            .tests_saved(fields.num(5, "tests_saved")?),
        "PMinus1" | "Pminus1" => {
            let mut builder = candidate(&fields, WorkType::PMinus1)?
                .bounds(fields.num(4, "B1")?, fields.num(5, "B2")?);
            if fields.len() >= 7 {
                builder = builder.sieve_depth(fields.num(6, "sieve_depth")?);
            }
            // Field 8 is the stage 2 start point, which the agent never needs.
            if fields.len() >= 9 {
                builder = builder.known_factors(Some(fields.raw(8, "known_factors")?.to_owned()));
            }
            builder
        }
        _ => {
            let mut builder = candidate(&fields, WorkType::Cert)?;
            if fields.len() >= 5 {
                builder = builder.cert_squarings(fields.num(4, "squarings")?);
            }
            builder
        }
    };

    match id {
        Some(id) => builder.id(id),
        None => builder,
    }
    .build()
}

fn candidate(fields: &Fields, work_type: WorkType) -> Result<AssignmentBuilder, ParseError> {
    let k: f64 = fields.num(0, "k")?;
    let base: u32 = fields.num(1, "base")?;
    let exponent: u64 = fields.num(2, "exponent")?;
    let c: i64 = fields.num(3, "c")?;
    Ok(AssignmentBuilder::new(work_type, exponent).candidate(k, base, c))
}

/// Renders a float the way the engines write them: no trailing `.0`.
pub(crate) fn compact_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

fn quote_list(value: &str) -> String {
    if value.contains(',') {
        format!("\"{value}\"")
    } else {
        value.to_owned()
    }
}

pub fn tag(assignment: &Assignment) -> &'static str {
    match assignment.work_type() {
        WorkType::FirstLl => "Test",
        WorkType::DoubleCheckLl => "DoubleCheck",
        WorkType::Prp if assignment.is_prp_double_check() => "PRPDC",
        WorkType::Prp => "PRP",
        WorkType::PFactor => "Pfactor",
        WorkType::PMinus1 => "Pminus1",
        WorkType::Cert => "Cert",
    }
}

pub fn format_line(assignment: &Assignment) -> String {
    let mut fields: Vec<String> = Vec::new();
    if let Some(id) = assignment.id() {
        fields.push(id.to_owned());
    }
    let candidate = |fields: &mut Vec<String>| {
        fields.push(format!("{:.0}", assignment.k()));
        fields.push(assignment.base().to_string());
        fields.push(assignment.exponent().to_string());
        fields.push(assignment.c().to_string());
    };

    match assignment.work_type() {
        WorkType::FirstLl | WorkType::DoubleCheckLl => {
            fields.push(assignment.exponent().to_string());
            fields.push(compact_float(assignment.sieve_depth()));
            fields.push(u8::from(assignment.pminus1_done()).to_string());
        }
        WorkType::Prp => {
            candidate(&mut fields);
            let has_prp_options = assignment.prp_base() != 0 || assignment.residue_type() != 0;
            if assignment.sieve_depth() != DEFAULT_SIEVE_DEPTH
                || assignment.tests_saved() > 0.0
                || has_prp_options
            {
                fields.push(compact_float(assignment.sieve_depth()));
                fields.push(compact_float(assignment.tests_saved()));
                if has_prp_options {
                    fields.push(assignment.prp_base().to_string());
                    fields.push(assignment.residue_type().to_string());
                }
            }
            if let Some(factors) = assignment.known_factors() {
                fields.push(quote_list(factors));
            }
        }
        WorkType::PFactor => {
            candidate(&mut fields);
            fields.push(compact_float(assignment.sieve_depth()));
            fields.push(compact_float(assignment.tests_saved()));
        }
        WorkType::PMinus1 => {
            candidate(&mut fields);
            fields.push(assignment.b1().to_string());
            fields.push(assignment.b2().to_string());
            let factors = assignment.known_factors();
            if assignment.sieve_depth() != DEFAULT_SIEVE_DEPTH || factors.is_some() {
                fields.push(compact_float(assignment.sieve_depth()));
            }
            if let Some(factors) = factors {
                fields.push("0".to_owned());
                fields.push(quote_list(factors));
            }
        }
        WorkType::Cert => {
            candidate(&mut fields);
            fields.push(assignment.cert_squarings().to_string());
        }
    }

    format!("{}={}", tag(assignment), fields.join(","))
}
