// Cross-cutting prompt fragments shared by every completion capability.
// Stage-specific prompts live with the pipeline.

/// System prompt that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with a single valid JSON object only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Appended to a prompt when the previous answer for the same stage failed validation.
pub const VALIDATION_REMINDER: &str = "\n\nIMPORTANT: Your previous answer could not be used \
    because it was not a valid JSON object matching the requested structure. \
    Return ONLY the JSON object, with every required field present.";
