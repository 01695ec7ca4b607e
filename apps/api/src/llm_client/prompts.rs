// Shared prompt fragments for generation requests.

/// System prompt fragment that enforces a bare JSON array reply.
pub const JSON_ARRAY_ONLY: &str = "You MUST respond with a valid JSON array only. \
    Do NOT include any text outside the array. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Shape every generated item must follow.
pub const OUTPUT_SHAPE: &str = r##"[
  {
    "content": "post text, at most 280 characters",
    "hashtags": ["#tag1", "#tag2"],
    "topics": ["topic1", "topic2"],
    "style": "casual or formal"
  }
]"##;

/// Quality bar appended to every generation prompt.
pub const QUALITY_RULES: &str = "\
    - Say something real and specific; avoid empty platitudes.\n\
    - Offer knowledge, inspiration or entertainment.\n\
    - Stay close to the reader's interests.\n\
    - Do not repeat concepts or phrasing across posts.\n\
    - Where it fits, end with a question or a prompt to reflect.";

pub fn user_instruction(count: usize) -> String {
    format!(
        "Write exactly {count} high-quality short posts that meet the requirements above \
         (each under 280 characters)."
    )
}
