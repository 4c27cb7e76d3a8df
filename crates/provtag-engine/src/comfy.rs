//! ComfyUI workflow stored in the `prompt` text field.

use provtag_contracts::provenance::ComfyRecord;

use crate::container::TextFields;
use crate::error::{DecodeError, DecodeResult};
use crate::json_repair::parse_lenient;

pub const PROMPT_FIELD: &str = "prompt";

pub fn decode(fields: &TextFields) -> DecodeResult<ComfyRecord> {
    let raw = fields.require(PROMPT_FIELD)?;
    let workflow = parse_lenient(raw)?;
    if !workflow.is_object() {
        return Err(DecodeError::NotAnObject(PROMPT_FIELD.to_string()));
    }
    Ok(ComfyRecord { workflow })
}
