//! `parameters` text written by the A1111 web UI.

use provtag_contracts::provenance::A111Record;

use crate::container::{TextFields, PARAMETERS_FIELD};
use crate::error::DecodeResult;

const NEGATIVE_MARKER: &str = "Negative prompt:";
const STEPS_MARKER: &str = "Steps:";

pub fn decode(fields: &TextFields) -> DecodeResult<A111Record> {
    let raw = fields.require(PARAMETERS_FIELD)?;
    Ok(partition(raw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    Prompt,
    Negative,
    Generation,
}

/// Splits the field on commas and assigns tokens to prompt / negative prompt /
/// generation info. A token switches the run when it contains a marker anywhere,
/// so prompts that contain the marker text are mis-assigned.
pub fn partition(raw: &str) -> A111Record {
    if !raw.contains(NEGATIVE_MARKER) && !raw.contains(STEPS_MARKER) {
        return A111Record {
            prompt: collapse_newlines(raw.trim()),
            ..A111Record::default()
        };
    }

    let mut prompt: Vec<String> = Vec::new();
    let mut negative: Vec<String> = Vec::new();
    let mut generation: Vec<String> = Vec::new();
    let mut run = Run::Prompt;

    for token in raw.split(',') {
        let mut token = token.trim().to_string();
        if run == Run::Prompt && token.contains(NEGATIVE_MARKER) {
            run = Run::Negative;
            token = token.replacen(NEGATIVE_MARKER, "", 1).trim().to_string();
        }
        if run != Run::Generation && token.contains(STEPS_MARKER) {
            run = Run::Generation;
            token = token.replacen(STEPS_MARKER, "", 1).trim().to_string();
        }
        if token.is_empty() {
            continue;
        }
        match run {
            Run::Prompt => prompt.push(token),
            Run::Negative => negative.push(token),
            Run::Generation => generation.push(token),
        }
    }

    A111Record {
        prompt: collapse_newlines(&prompt.join(",")),
        negative_prompt: collapse_newlines(&negative.join(",")),
        generation_info: collapse_newlines(&generation.join(",")),
    }
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_newline = false;
    for ch in text.chars() {
        if ch == '\n' {
            if previous_newline {
                continue;
            }
            previous_newline = true;
        } else {
            previous_newline = false;
        }
        out.push(ch);
    }
    out
}
